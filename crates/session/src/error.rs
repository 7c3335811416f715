// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::inspect::Malformed;

/// Error codes surfaced by the session core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Transport failure, no response received.
    NetworkFailure,
    /// The server answered 401 and a retry did not help.
    AuthRejected,
    /// A refresh after a 401 failed; stored credentials were cleared.
    SessionExpired,
    /// The stored access credential could not be decoded.
    MalformedCredential,
    /// Login rejected by the server.
    ValidationFailure,
    /// Any other non-success response.
    RequestFailed,
    /// Success status with a body that could not be decoded.
    InvalidResponse,
    /// Rejected locally because no credential is available.
    NotAuthenticated,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkFailure => "NETWORK_FAILURE",
            Self::AuthRejected => "AUTH_REJECTED",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::MalformedCredential => "MALFORMED_CREDENTIAL",
            Self::ValidationFailure => "VALIDATION_FAILURE",
            Self::RequestFailed => "REQUEST_FAILED",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
        }
    }

    /// Whether recovering from this error requires logging in again.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::SessionExpired
                | Self::NotAuthenticated
                | Self::AuthRejected
                | Self::MalformedCredential
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by gateway and session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: ErrorCode,
    /// HTTP status, when the error came from a response.
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, status: None, message: message.into() }
    }

    pub fn with_status(code: ErrorCode, status: u16, message: impl Into<String>) -> Self {
        Self { code, status: Some(status), message: message.into() }
    }

    /// Build an error from a non-success response body.
    pub fn from_response(code: ErrorCode, status: u16, body: &[u8]) -> Self {
        Self::with_status(code, status, error_message(status, body))
    }

    pub fn network(err: &reqwest::Error) -> Self {
        Self::new(ErrorCode::NetworkFailure, format!("network error: {err}"))
    }

    pub fn session_expired() -> Self {
        Self::new(ErrorCode::SessionExpired, "Session expired. Please log in again.")
    }

    pub fn not_authenticated() -> Self {
        Self::new(ErrorCode::NotAuthenticated, "not authenticated")
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<Malformed> for ApiError {
    fn from(err: Malformed) -> Self {
        Self::new(ErrorCode::MalformedCredential, format!("malformed credential: {err}"))
    }
}

/// Failure of a credential refresh exchange.
///
/// `Clone` so every waiter on a shared in-flight refresh receives the same outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// No refresh credential stored; no request was made.
    NoRefreshToken,
    /// The server refused the refresh credential.
    Rejected { status: u16, message: String },
    Network(String),
    InvalidResponse(String),
    /// Credentials were cleared while the exchange was in flight.
    SessionCleared,
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRefreshToken => f.write_str("no refresh token stored"),
            Self::Rejected { status, message } => write!(f, "refresh rejected ({status}): {message}"),
            Self::Network(e) => write!(f, "refresh network error: {e}"),
            Self::InvalidResponse(e) => write!(f, "invalid refresh response: {e}"),
            Self::SessionCleared => f.write_str("session cleared during refresh"),
        }
    }
}

impl std::error::Error for RefreshError {}

/// Extract a human-readable message from an error response body.
///
/// Accepts a JSON string, a list of strings (joined with `"; "`), or an object
/// carrying `message`, `detail` or `errors`. Anything else falls back to a
/// status-coded message.
pub fn error_message(status: u16, body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| message_from_value(&value))
        .unwrap_or_else(|| format!("Request failed with status {status}"))
}

fn message_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_owned())
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(message_from_value).collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        Value::Object(map) => map
            .get("message")
            .and_then(message_from_value)
            .or_else(|| map.get("detail").and_then(message_from_value))
            .or_else(|| map.get("errors").and_then(field_errors)),
        _ => None,
    }
}

/// `errors` may be a list or a `{field: messages}` map.
fn field_errors(value: &Value) -> Option<String> {
    let Value::Object(fields) = value else {
        return message_from_value(value);
    };
    if fields.contains_key("message") || fields.contains_key("detail") {
        return message_from_value(value);
    }
    let parts: Vec<String> = fields
        .iter()
        .filter_map(|(field, msgs)| message_from_value(msgs).map(|m| format!("{field}: {m}")))
        .collect();
    (!parts.is_empty()).then(|| parts.join("; "))
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
