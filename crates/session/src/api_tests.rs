// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::net::SocketAddr;
use std::sync::atomic::Ordering;

use crate::test_support::spawn_auth_server;

use super::*;

fn api(addr: SocketAddr) -> AuthApi {
    AuthApi::new(format!("http://{addr}/api"), http_client(Duration::from_secs(5)))
}

#[yare::parameterized(
    leading_slash = { "http://h/api", "/auth/me", "http://h/api/auth/me" },
    bare = { "http://h/api", "auth/me", "http://h/api/auth/me" },
    trailing_base = { "http://h/api/", "/auth/me", "http://h/api/auth/me" },
    absolute = { "http://h/api", "https://other/x", "https://other/x" },
)]
fn join_url_cases(base: &str, path: &str, expected: &str) {
    assert_eq!(join_url(base, path), expected);
}

#[test]
fn user_profile_decodes() -> anyhow::Result<()> {
    let user: User = serde_json::from_str(
        r#"{"username":"root","role":"admin","is_active":true,"created_at":"2025-01-01T00:00:00Z"}"#,
    )?;
    assert!(user.is_admin());
    assert_eq!(user.last_login, None);
    Ok(())
}

#[yare::parameterized(
    utc = { "2025-01-01T00:00:00Z", "2025-01-01T00:00:00Z" },
    offset = { "2025-01-01T02:00:00+02:00", "2025-01-01T00:00:00Z" },
    naive_fraction = { "2025-01-01T00:00:00.123456", "2025-01-01T00:00:00.123456Z" },
    naive_plain = { "2025-01-01T00:00:00", "2025-01-01T00:00:00Z" },
    naive_space = { "2025-01-01 00:00:00", "2025-01-01T00:00:00Z" },
)]
fn timestamps_parse_leniently(raw: &str, expected: &str) {
    let expected = DateTime::parse_from_rfc3339(expected).expect("expected").with_timezone(&Utc);
    assert_eq!(parse_timestamp(raw), Some(expected));
}

#[test]
fn naive_profile_timestamps_decode() -> anyhow::Result<()> {
    let user: User = serde_json::from_str(
        r#"{"username":"alice","role":"user","is_active":true,
            "created_at":"2025-01-01T00:00:00.123456","last_login":"2025-06-01T12:00:00"}"#,
    )?;
    assert_eq!(user.created_at, DateTime::parse_from_rfc3339("2025-01-01T00:00:00.123456Z")?);
    assert!(user.last_login.is_some());
    Ok(())
}

#[test]
fn garbage_timestamp_is_rejected() {
    let result = serde_json::from_str::<User>(
        r#"{"username":"alice","role":"user","is_active":true,"created_at":"yesterday"}"#,
    );
    assert!(result.is_err());
}

#[tokio::test]
async fn login_returns_pair() {
    let (addr, mock) = spawn_auth_server().await;

    let pair = api(addr).login("alice", "validPW").await.expect("login");

    assert!(!pair.access.is_empty());
    assert!(pair.refresh.starts_with("refresh-alice-"));
    assert_eq!(mock.login_calls.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn login_rejection_is_a_validation_failure() {
    let (addr, _mock) = spawn_auth_server().await;

    let err = api(addr).login("alice", "nope").await.expect_err("rejected");

    assert_eq!(err.code, ErrorCode::ValidationFailure);
    assert_eq!(err.status, Some(401));
    assert_eq!(err.message, "Invalid username or password");
}

#[tokio::test]
async fn refresh_rotates_pair() {
    let (addr, mock) = spawn_auth_server().await;
    let (_, refresh) = mock.issue("alice");

    let pair = api(addr).refresh(&refresh).await.expect("refresh");

    assert_ne!(pair.refresh, refresh);
    assert_eq!(mock.refresh_calls.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn unknown_refresh_credential_is_rejected() {
    let (addr, _mock) = spawn_auth_server().await;

    let err = api(addr).refresh("refresh-nobody-0").await.expect_err("rejected");

    assert_eq!(
        err,
        RefreshError::Rejected { status: 401, message: "Invalid refresh token".into() }
    );
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let api = api(SocketAddr::from(([127, 0, 0, 1], 1)));

    let err = api.refresh("r").await.expect_err("no server");
    assert!(matches!(err, RefreshError::Network(_)), "{err:?}");

    let err = api.login("alice", "validPW").await.expect_err("no server");
    assert_eq!(err.code, ErrorCode::NetworkFailure);
}
