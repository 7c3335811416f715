// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unverified decoding of access credentials.
//!
//! Only the payload segment is read, to learn the subject and expiry. The
//! signature is never checked here; anything that fails to decode counts as
//! expired.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

/// Source of the current wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }
}

/// Claims the session core cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub subject: String,
    /// Expiry as epoch milliseconds.
    pub expires_at_ms: u64,
}

/// Why a token could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    Segments,
    Base64,
    Json,
    MissingSubject,
    MissingExpiry,
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Segments => "expected three dot-separated segments",
            Self::Base64 => "payload is not base64url",
            Self::Json => "payload is not a JSON object",
            Self::MissingSubject => "payload has no subject",
            Self::MissingExpiry => "payload has no usable expiry",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Malformed {}

/// Decode the payload of a `header.payload.signature` token.
pub fn decode(token: &str) -> Result<TokenClaims, Malformed> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_sig), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return Err(Malformed::Segments);
    };

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).map_err(|_| Malformed::Base64)?;
    let claims: Value = serde_json::from_slice(&bytes).map_err(|_| Malformed::Json)?;
    let Value::Object(claims) = claims else {
        return Err(Malformed::Json);
    };

    let subject = match claims.get("sub") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(Malformed::MissingSubject),
    };
    let exp_secs = claims
        .get("exp")
        .and_then(Value::as_f64)
        .filter(|exp| exp.is_finite() && *exp >= 0.0)
        .ok_or(Malformed::MissingExpiry)?;

    Ok(TokenClaims { subject, expires_at_ms: (exp_secs * 1000.0) as u64 })
}

/// Answers expiry questions about access credentials against a clock.
#[derive(Clone)]
pub struct TokenInspector {
    clock: Arc<dyn Clock>,
}

impl TokenInspector {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn decode(&self, token: &str) -> Result<TokenClaims, Malformed> {
        decode(token)
    }

    /// True if the token is undecodable or `now + margin >= expiry`.
    pub fn is_expired(&self, token: &str, margin: Duration) -> bool {
        match decode(token) {
            Ok(claims) => {
                let margin_ms = u64::try_from(margin.as_millis()).unwrap_or(u64::MAX);
                self.clock.now_ms().saturating_add(margin_ms) >= claims.expires_at_ms
            }
            Err(e) => {
                tracing::debug!(err = %e, "treating malformed credential as expired");
                true
            }
        }
    }

    /// Remaining lifetime, or `None` if expired or undecodable.
    pub fn expires_in(&self, token: &str) -> Option<Duration> {
        let claims = decode(token).ok()?;
        let now = self.clock.now_ms();
        (claims.expires_at_ms > now).then(|| Duration::from_millis(claims.expires_at_ms - now))
    }
}

impl Default for TokenInspector {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl fmt::Debug for TokenInspector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenInspector").field("now_ms", &self.clock.now_ms()).finish()
    }
}

#[cfg(test)]
#[path = "inspect_tests.rs"]
mod tests;
