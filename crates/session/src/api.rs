// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire types and the unauthenticated auth endpoints (`/auth/login`, `/auth/refresh`).

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::error::{ApiError, ErrorCode, RefreshError};
use crate::store::TokenPair;

pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const PROFILE_PATH: &str = "/auth/me";

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Response body of login and refresh.
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

impl From<TokenResponse> for TokenPair {
    fn from(resp: TokenResponse) -> Self {
        TokenPair { access: resp.access_token, refresh: resp.refresh_token }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

/// Profile of the signed-in user, as returned by `GET /auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub role: Role,
    pub is_active: bool,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Parse an RFC 3339 timestamp, or a naive one taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
}

fn deserialize_optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}"))),
    }
}

/// Build the shared HTTP client.
pub fn http_client(timeout: Duration) -> Client {
    let _ = rustls::crypto::ring::default_provider().install_default();
    Client::builder().timeout(timeout).build().unwrap_or_default()
}

/// Join an API base URL and an endpoint path.
///
/// Absolute URLs in `path` are used as-is.
pub fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_owned();
    }
    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Client for the endpoints that exchange secrets for credentials.
pub struct AuthApi {
    base_url: String,
    client: Client,
}

impl AuthApi {
    pub fn new(base_url: impl Into<String>, client: Client) -> Self {
        Self { base_url: base_url.into(), client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Exchange a username and password for a credential pair.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair, ApiError> {
        let resp = self
            .client
            .post(self.url(LOGIN_PATH))
            .json(&LoginRequest { username, password })
            .send()
            .await
            .map_err(|e| ApiError::network(&e))?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| ApiError::network(&e))?;
        if !status.is_success() {
            let code = match status.as_u16() {
                400 | 401 | 403 | 422 => ErrorCode::ValidationFailure,
                _ => ErrorCode::RequestFailed,
            };
            return Err(ApiError::from_response(code, status.as_u16(), &body));
        }

        let token: TokenResponse = serde_json::from_slice(&body).map_err(|e| {
            ApiError::with_status(
                ErrorCode::InvalidResponse,
                status.as_u16(),
                format!("invalid login response: {e}"),
            )
        })?;
        Ok(token.into())
    }

    /// Exchange a refresh credential for a new pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, RefreshError> {
        let resp = self
            .client
            .post(self.url(REFRESH_PATH))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| RefreshError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                message: crate::error::error_message(status.as_u16(), &body),
            });
        }

        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;
        Ok(token.into())
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
