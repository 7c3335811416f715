// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;

#[test]
fn session_ended_uses_namespaced_tag() -> anyhow::Result<()> {
    let event = SessionEvent::SessionEnded { reason: "refresh rejected".into() };
    assert_eq!(
        serde_json::to_value(&event)?,
        json!({ "event": "session:ended", "reason": "refresh rejected" })
    );
    Ok(())
}

#[test]
fn unit_events_serialize_as_tag_only() -> anyhow::Result<()> {
    assert_eq!(serde_json::to_value(SessionEvent::LoggedOut)?, json!({ "event": "logged_out" }));
    assert_eq!(serde_json::to_value(SessionEvent::Refreshed)?, json!({ "event": "refreshed" }));
    Ok(())
}
