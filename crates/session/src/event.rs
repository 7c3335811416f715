// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// Events published on a session's broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Login completed and the profile was fetched.
    LoggedIn { username: String },
    /// A new credential pair was stored.
    Refreshed,
    /// Local logout.
    LoggedOut,
    /// Credentials were rejected and could not be refreshed.
    #[serde(rename = "session:ended")]
    SessionEnded { reason: String },
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
