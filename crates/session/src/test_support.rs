// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers: token minting and a mock auth server.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;

use crate::config::SessionConfig;
use crate::inspect::{decode, Clock, SystemClock};

/// Clock pinned to a fixed instant.
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        self.0
    }
}

pub fn now_secs() -> u64 {
    SystemClock.now_ms() / 1000
}

/// Mint an unsigned token with the given subject and absolute expiry.
pub fn mint_token(sub: &str, exp_secs: u64) -> String {
    mint_with_payload(&json!({ "sub": sub, "exp": exp_secs }))
}

pub fn mint_with_payload(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.sig")
}

/// Mint a token expiring `secs` seconds from now.
pub fn token_expiring_in(sub: &str, secs: u64) -> String {
    mint_token(sub, now_secs() + secs)
}

/// Mint a token that expired `secs` seconds ago.
pub fn expired_token(sub: &str, secs: u64) -> String {
    mint_token(sub, now_secs().saturating_sub(secs))
}

/// Config pointing at a mock server, with test-friendly timings.
pub fn test_config(addr: SocketAddr) -> SessionConfig {
    SessionConfig {
        api_url: format!("http://{addr}/api"),
        state_dir: None,
        refresh_margin_ms: 300_000,
        check_interval_ms: 60_000,
        request_timeout_ms: 5_000,
    }
}

/// Knobs and counters for [`spawn_auth_server`].
pub struct MockAuth {
    pub login_calls: AtomicU32,
    pub refresh_calls: AtomicU32,
    pub me_calls: AtomicU32,
    pub data_calls: AtomicU32,
    /// Reject every refresh with 401.
    pub fail_refresh: AtomicBool,
    pub refresh_delay_ms: AtomicU64,
    pub login_delay_ms: AtomicU64,
    pub data_delay_ms: AtomicU64,
    /// Lifetime of newly issued access tokens.
    pub access_ttl_secs: AtomicU64,
    /// Number of upcoming `/data` calls answered with 401 regardless of credentials.
    pub reject_data: AtomicU32,
    /// Authorization header seen by the most recent `/data` call.
    pub last_auth: Mutex<Option<String>>,
    valid_access: Mutex<HashSet<String>>,
    valid_refresh: Mutex<HashSet<String>>,
    issued: AtomicU64,
}

impl Default for MockAuth {
    fn default() -> Self {
        Self {
            login_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            me_calls: AtomicU32::new(0),
            data_calls: AtomicU32::new(0),
            fail_refresh: AtomicBool::new(false),
            refresh_delay_ms: AtomicU64::new(0),
            login_delay_ms: AtomicU64::new(0),
            data_delay_ms: AtomicU64::new(0),
            access_ttl_secs: AtomicU64::new(3600),
            reject_data: AtomicU32::new(0),
            last_auth: Mutex::new(None),
            valid_access: Mutex::new(HashSet::new()),
            valid_refresh: Mutex::new(HashSet::new()),
            issued: AtomicU64::new(0),
        }
    }
}

impl MockAuth {
    /// Issue and register a fresh pair for `user`.
    pub fn issue(&self, user: &str) -> (String, String) {
        let n = self.issued.fetch_add(1, Ordering::Relaxed);
        let exp = now_secs() + self.access_ttl_secs.load(Ordering::Relaxed);
        let access = mint_with_payload(&json!({ "sub": user, "exp": exp, "jti": n }));
        let refresh = format!("refresh-{user}-{n}");
        self.valid_access.lock().insert(access.clone());
        self.valid_refresh.lock().insert(refresh.clone());
        (access, refresh)
    }

    fn subject_for(&self, headers: &HeaderMap) -> Option<String> {
        let header = headers.get("authorization")?.to_str().ok()?;
        let token = header.strip_prefix("Bearer ")?;
        if !self.valid_access.lock().contains(token) {
            return None;
        }
        let claims = decode(token).ok()?;
        (claims.expires_at_ms > SystemClock.now_ms()).then_some(claims.subject)
    }
}

fn unauthorized(detail: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "detail": detail }))).into_response()
}

async fn login(State(s): State<Arc<MockAuth>>, Json(body): Json<serde_json::Value>) -> Response {
    s.login_calls.fetch_add(1, Ordering::Relaxed);
    let delay = s.login_delay_ms.load(Ordering::Relaxed);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let username = body["username"].as_str().unwrap_or_default();
    let password = body["password"].as_str().unwrap_or_default();
    let known = matches!((username, password), ("alice", "validPW") | ("root", "rootPW"));
    if !known {
        return unauthorized("Invalid username or password");
    }
    let (access, refresh) = s.issue(username);
    Json(json!({ "access_token": access, "refresh_token": refresh })).into_response()
}

async fn refresh(State(s): State<Arc<MockAuth>>, Json(body): Json<serde_json::Value>) -> Response {
    s.refresh_calls.fetch_add(1, Ordering::Relaxed);
    let delay = s.refresh_delay_ms.load(Ordering::Relaxed);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let token = body["refresh_token"].as_str().unwrap_or_default().to_owned();
    if s.fail_refresh.load(Ordering::Relaxed) || !s.valid_refresh.lock().remove(&token) {
        return unauthorized("Invalid refresh token");
    }
    let user = token.trim_start_matches("refresh-").rsplit_once('-').map(|(u, _)| u.to_owned());
    let (access, refresh) = s.issue(&user.unwrap_or_default());
    Json(json!({ "access_token": access, "refresh_token": refresh })).into_response()
}

async fn me(State(s): State<Arc<MockAuth>>, headers: HeaderMap) -> Response {
    s.me_calls.fetch_add(1, Ordering::Relaxed);
    let Some(user) = s.subject_for(&headers) else {
        return unauthorized("Not authenticated");
    };
    let role = if user == "root" { "admin" } else { "user" };
    Json(json!({
        "username": user,
        "role": role,
        "is_active": true,
        "created_at": "2025-01-01T00:00:00Z",
        "last_login": null,
    }))
    .into_response()
}

async fn data(State(s): State<Arc<MockAuth>>, headers: HeaderMap) -> Response {
    s.data_calls.fetch_add(1, Ordering::Relaxed);
    *s.last_auth.lock() =
        headers.get("authorization").and_then(|v| v.to_str().ok()).map(str::to_owned);
    let delay = s.data_delay_ms.load(Ordering::Relaxed);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let rejected = s
        .reject_data
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
        .is_ok();
    if rejected {
        return unauthorized("Token has expired");
    }
    match s.subject_for(&headers) {
        Some(user) => Json(json!({ "ok": true, "user": user })).into_response(),
        None => unauthorized("Not authenticated"),
    }
}

async fn public() -> Response {
    Json(json!({ "version": "1.0" })).into_response()
}

async fn invalid() -> Response {
    (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "detail": ["name too short", "bad email"] })))
        .into_response()
}

/// Start the mock server on an ephemeral port.
pub async fn spawn_auth_server() -> (SocketAddr, Arc<MockAuth>) {
    let state = Arc::new(MockAuth::default());
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/me", get(me))
        .route("/api/data", get(data))
        .route("/api/public", get(public))
        .route("/api/invalid", post(invalid))
        .with_state(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (addr, state)
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
