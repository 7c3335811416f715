// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a credential session against one API.
#[derive(Debug, Clone, clap::Args)]
pub struct SessionConfig {
    /// Base URL of the API (auth endpoints live under `/auth`).
    #[arg(long, default_value = "http://127.0.0.1:8080/api", env = "TOKENWARD_API_URL")]
    pub api_url: String,

    /// Directory holding persisted credentials.
    #[arg(long, env = "TOKENWARD_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Refresh the access credential when it expires within this many milliseconds.
    #[arg(long, default_value_t = 300_000, env = "TOKENWARD_REFRESH_MARGIN_MS")]
    pub refresh_margin_ms: u64,

    /// Interval of the background expiry check in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "TOKENWARD_CHECK_INTERVAL_MS")]
    pub check_interval_ms: u64,

    /// Per-request timeout in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "TOKENWARD_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8080/api".to_owned(),
            state_dir: None,
            refresh_margin_ms: 300_000,
            check_interval_ms: 60_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl SessionConfig {
    pub fn refresh_margin(&self) -> Duration {
        Duration::from_millis(self.refresh_margin_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Resolve the state directory.
    ///
    /// Uses `--state-dir` if given, then `$XDG_STATE_HOME/tokenward`,
    /// then `$HOME/.local/state/tokenward`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("tokenward");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/tokenward");
        }
        PathBuf::from(".tokenward")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            anyhow::bail!("--api-url must start with http:// or https://: {}", self.api_url);
        }
        if self.check_interval_ms == 0 {
            anyhow::bail!("--check-interval-ms must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
