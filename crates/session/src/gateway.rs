// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated request path.
//!
//! Every outbound API call goes through [`RequestGateway::send`], which
//! attaches the bearer credential, refreshes ahead of expiry, and answers a
//! 401 with exactly one refresh-and-retry.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::api::join_url;
use crate::error::{ApiError, ErrorCode, RefreshError};
use crate::event::SessionEvent;
use crate::inspect::TokenInspector;
use crate::refresh::RefreshCoordinator;
use crate::store::TokenStore;

/// Attempt number of one logical request. A request is sent at most twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retry,
}

/// An API request relative to the gateway's base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), query: vec![], body: None }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Send without credentials and without refresh or retry.
    pub skip_auth: bool,
}

impl SendOptions {
    pub fn anonymous() -> Self {
        Self { skip_auth: true }
    }
}

/// A successful response with its body fully read.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ApiResponse {
    /// Decode the body as JSON. An empty body decodes as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let body: &[u8] = if self.body.is_empty() { b"null" } else { &self.body };
        serde_json::from_slice(body).map_err(|e| {
            ApiError::with_status(
                ErrorCode::InvalidResponse,
                self.status,
                format!("invalid response body: {e}"),
            )
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Wraps outbound calls with credential handling.
pub struct RequestGateway {
    base_url: String,
    client: Client,
    store: Arc<TokenStore>,
    inspector: TokenInspector,
    refresher: Arc<RefreshCoordinator>,
    margin: Duration,
    events: broadcast::Sender<SessionEvent>,
}

impl RequestGateway {
    pub fn new(
        base_url: impl Into<String>,
        client: Client,
        store: Arc<TokenStore>,
        inspector: TokenInspector,
        refresher: Arc<RefreshCoordinator>,
        margin: Duration,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self { base_url: base_url.into(), client, store, inspector, refresher, margin, events }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request, handling credentials and the 401 retry.
    ///
    /// Non-success responses become errors with a message extracted from the
    /// body. If a 401 cannot be recovered by refreshing, stored credentials
    /// are cleared, `SessionEnded` is published, and `SessionExpired` returned.
    pub async fn send(
        &self,
        request: &ApiRequest,
        options: SendOptions,
    ) -> Result<ApiResponse, ApiError> {
        if options.skip_auth {
            let response = self.dispatch(request, None).await?;
            return into_result(response);
        }

        let generation = self.store.generation();
        let mut attempt = Attempt::First;
        let mut token = self.fresh_access().await;
        loop {
            let response = self.dispatch(request, token.as_deref()).await?;
            if response.status != 401 {
                return into_result(response);
            }

            if attempt == Attempt::Retry {
                warn!(path = %request.path, "request rejected again after refresh");
                return Err(ApiError::from_response(ErrorCode::AuthRejected, 401, &response.body));
            }
            attempt = Attempt::Retry;

            let stored = self.store.get_access();
            if stored.is_some() && stored != token {
                debug!(path = %request.path, "credential changed since request was sent, retrying");
                token = stored;
                continue;
            }

            debug!(path = %request.path, "request rejected with 401, refreshing");
            match self.refresher.refresh().await {
                Ok(pair) => token = Some(pair.access),
                Err(e) => {
                    self.end_session(generation, &e);
                    return Err(ApiError::session_expired());
                }
            }
        }
    }

    /// Send and decode a JSON response.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        options: SendOptions,
    ) -> Result<T, ApiError> {
        self.send(request, options).await?.json()
    }

    /// Build an authenticated streaming URL for `path`.
    ///
    /// The access credential travels as a `token` query parameter; the scheme
    /// maps `http` to `ws` and `https` to `wss`.
    pub async fn ws_url(&self, path: &str) -> Result<String, ApiError> {
        let token = self.fresh_access().await.ok_or_else(ApiError::not_authenticated)?;
        streaming_url(&self.base_url, path, &token)
    }

    /// The stored access credential, refreshed first if inside the margin.
    ///
    /// A failed refresh falls back to whatever is stored; a 401 decides from there.
    async fn fresh_access(&self) -> Option<String> {
        let access = self.store.get_access()?;
        if !self.inspector.is_expired(&access, self.margin) {
            return Some(access);
        }

        debug!("access credential near expiry, refreshing before request");
        match self.refresher.refresh().await {
            Ok(pair) => Some(pair.access),
            Err(e) => {
                debug!(err = %e, "proactive refresh failed, using stored credential");
                self.store.get_access()
            }
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let mut req = self.client.request(request.method.clone(), join_url(&self.base_url, &request.path));
        if !request.query.is_empty() {
            req = req.query(&request.query);
        }
        if let Some(ref body) = request.body {
            req = req.json(body);
        }
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| {
            warn!(path = %request.path, err = %e, "request failed");
            ApiError::network(&e)
        })?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(|e| ApiError::network(&e))?;
        Ok(ApiResponse { status, body })
    }

    /// Clear credentials and announce the end of the session.
    ///
    /// Only the caller that actually removed credentials publishes, so
    /// concurrent failures produce one event. A session started after the
    /// request was sent is left alone.
    fn end_session(&self, generation: u64, err: &RefreshError) {
        if self.store.clear_if(generation) {
            warn!(err = %err, "refresh after 401 failed, ending session");
            let _ = self.events.send(SessionEvent::SessionEnded { reason: err.to_string() });
        }
    }
}

fn into_result(response: ApiResponse) -> Result<ApiResponse, ApiError> {
    match response.status {
        200..=399 => Ok(response),
        401 => Err(ApiError::from_response(ErrorCode::AuthRejected, 401, &response.body)),
        status => Err(ApiError::from_response(ErrorCode::RequestFailed, status, &response.body)),
    }
}

/// Append `token=<access>` to the streaming URL for `path`.
pub fn streaming_url(base_url: &str, path: &str, token: &str) -> Result<String, ApiError> {
    let mut url = Url::parse(&join_url(base_url, path)).map_err(|e| {
        ApiError::new(ErrorCode::RequestFailed, format!("invalid streaming url: {e}"))
    })?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => other,
    }
    .to_owned();
    if url.set_scheme(&scheme).is_err() {
        return Err(ApiError::new(ErrorCode::RequestFailed, "cannot map streaming url scheme"));
    }
    url.query_pairs_mut().append_pair("token", token);
    Ok(url.into())
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
