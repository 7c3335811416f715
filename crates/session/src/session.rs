// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state machine: login, logout, startup recovery, and the
//! background expiry check.
//!
//! Every logout or forced session end bumps an epoch. Operations that
//! started under an older epoch may still finish their network calls, but
//! their state transitions are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{http_client, AuthApi, User, PROFILE_PATH};
use crate::config::SessionConfig;
use crate::error::{ApiError, ErrorCode};
use crate::event::SessionEvent;
use crate::gateway::{ApiRequest, ApiResponse, RequestGateway, SendOptions};
use crate::inspect::{TokenClaims, TokenInspector};
use crate::refresh::RefreshCoordinator;
use crate::store::{FileBackend, TokenStore};

/// Where the session currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated(User),
    /// Proactive refresh in progress; the user is still signed in.
    Refreshing(User),
}

impl SessionState {
    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Authenticated(user) | Self::Refreshing(user) => Some(user),
            Self::Unauthenticated | Self::Authenticating => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user().is_some()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated(_) => "authenticated",
            Self::Refreshing(_) => "refreshing",
        }
    }
}

/// Top-level credential session.
///
/// Collaborators log in and out, ask who is signed in, and send requests
/// through here. Must be created inside a tokio runtime.
pub struct SessionController {
    store: Arc<TokenStore>,
    inspector: TokenInspector,
    api: Arc<AuthApi>,
    refresher: Arc<RefreshCoordinator>,
    gateway: Arc<RequestGateway>,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    epoch: AtomicU64,
    margin: Duration,
    check_interval: Duration,
    shutdown: CancellationToken,
    ticker: Mutex<Option<CancellationToken>>,
}

impl SessionController {
    /// Create a session over `store`, using the system clock.
    pub fn new(config: &SessionConfig, store: TokenStore) -> Arc<Self> {
        Self::with_inspector(config, store, TokenInspector::default())
    }

    /// Create a session persisting credentials under the configured state dir.
    pub fn from_config(config: &SessionConfig) -> Arc<Self> {
        let store = TokenStore::new(FileBackend::new(&config.state_dir()));
        Self::new(config, store)
    }

    pub fn with_inspector(
        config: &SessionConfig,
        store: TokenStore,
        inspector: TokenInspector,
    ) -> Arc<Self> {
        let client = http_client(config.request_timeout());
        let store = Arc::new(store);
        let (events, _) = broadcast::channel(64);
        let api = Arc::new(AuthApi::new(config.api_url.clone(), client.clone()));
        let refresher = Arc::new(RefreshCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&api),
            events.clone(),
        ));
        let gateway = Arc::new(RequestGateway::new(
            config.api_url.clone(),
            client,
            Arc::clone(&store),
            inspector.clone(),
            Arc::clone(&refresher),
            config.refresh_margin(),
            events.clone(),
        ));
        let (state_tx, _) = watch::channel(SessionState::Unauthenticated);

        let session = Arc::new(Self {
            store,
            inspector,
            api,
            refresher,
            gateway,
            state_tx,
            events,
            epoch: AtomicU64::new(0),
            margin: config.refresh_margin(),
            check_interval: config.check_interval(),
            shutdown: CancellationToken::new(),
            ticker: Mutex::new(None),
        });
        spawn_session_end_listener(&session);
        session
    }

    // -- Queries --------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state_tx.borrow().user().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state_tx.borrow().is_authenticated()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Claims of the stored access credential.
    pub fn claims(&self) -> Result<TokenClaims, ApiError> {
        let access = self.store.get_access().ok_or_else(ApiError::not_authenticated)?;
        Ok(self.inspector.decode(&access)?)
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn inspector(&self) -> &TokenInspector {
        &self.inspector
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Recover a session from stored credentials. Call once at startup.
    pub async fn init(self: &Arc<Self>) -> SessionState {
        let epoch = self.epoch();
        let Some(pair) = self.store.pair() else {
            if self.store.clear_all() {
                debug!("incomplete stored credential pair, cleared");
            }
            self.transition(epoch, SessionState::Unauthenticated);
            return self.state();
        };

        if self.inspector.is_expired(&pair.access, Duration::ZERO) {
            info!("stored access credential expired, refreshing");
            if let Err(e) = self.refresher.refresh().await {
                warn!(err = %e, "startup refresh failed");
                self.discard(epoch);
                return self.state();
            }
        }

        match self.fetch_profile().await {
            Ok(user) => {
                info!(username = %user.username, "session restored");
                self.enter_authenticated(epoch, user);
            }
            Err(e) => {
                warn!(err = %e, "failed to fetch profile during startup");
                self.discard(epoch);
            }
        }
        self.state()
    }

    /// Exchange credentials for a session. Errors are returned, never retried.
    ///
    /// Any previous session is dropped first, so a failed login leaves no
    /// credentials behind.
    pub async fn login(self: &Arc<Self>, username: &str, password: &str) -> Result<User, ApiError> {
        self.stop_ticker();
        let epoch = self.begin_login();
        self.store.clear_all();
        let generation = self.store.generation();

        match self.try_login(epoch, generation, username, password).await {
            Ok(user) => Ok(user),
            Err(e) => {
                warn!(username, err = %e, "login failed");
                self.transition(epoch, SessionState::Unauthenticated);
                Err(e)
            }
        }
    }

    async fn try_login(
        self: &Arc<Self>,
        epoch: u64,
        generation: u64,
        username: &str,
        password: &str,
    ) -> Result<User, ApiError> {
        let pair = self.api.login(username, password).await?;
        if self.epoch() != epoch || !self.store.install_pair_if(generation, &pair) {
            return Err(superseded());
        }

        let user = match self.fetch_profile().await {
            Ok(user) => user,
            Err(e) => {
                if self.epoch() == epoch {
                    self.store.clear_all();
                }
                return Err(e);
            }
        };

        if !self.enter_authenticated(epoch, user.clone()) {
            return Err(superseded());
        }
        info!(username = %user.username, "logged in");
        let _ = self.events.send(SessionEvent::LoggedIn { username: user.username.clone() });
        Ok(user)
    }

    /// Clear credentials and return to `Unauthenticated`. Always succeeds.
    ///
    /// Requests and refreshes already in flight are not cancelled; their
    /// results are discarded.
    pub fn logout(&self) {
        self.end_local();
        self.store.clear_all();
        let _ = self.events.send(SessionEvent::LoggedOut);
        info!("logged out");
    }

    /// Stop background tasks. The stored credentials are kept.
    pub fn shutdown(&self) {
        self.stop_ticker();
        self.shutdown.cancel();
    }

    // -- Requests -------------------------------------------------------------

    /// Send an authenticated request.
    pub async fn request(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.send(request, SendOptions::default()).await
    }

    /// Send a request with explicit options.
    pub async fn send(
        &self,
        request: &ApiRequest,
        options: SendOptions,
    ) -> Result<ApiResponse, ApiError> {
        let result = self.gateway.send(request, options).await;
        if let Err(ref e) = result {
            if e.code == ErrorCode::SessionExpired {
                self.reset_if_signed_out();
            }
        }
        result
    }

    /// Send an authenticated request and decode its JSON body.
    pub async fn request_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        self.request(request).await?.json()
    }

    /// Authenticated streaming URL for `path`.
    pub async fn ws_url(&self, path: &str) -> Result<String, ApiError> {
        self.gateway.ws_url(path).await
    }

    // -- Internals ------------------------------------------------------------

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    async fn fetch_profile(&self) -> Result<User, ApiError> {
        self.send(&ApiRequest::get(PROFILE_PATH), SendOptions::default()).await?.json()
    }

    /// Apply `next` unless the epoch moved on. Returns false if it was stale.
    fn transition(&self, epoch: u64, next: SessionState) -> bool {
        let mut current = true;
        self.state_tx.send_if_modified(|state| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                current = false;
                return false;
            }
            if *state == next {
                return false;
            }
            debug!(from = state.as_str(), to = next.as_str(), "session transition");
            *state = next;
            true
        });
        current
    }

    /// Move to `Authenticating` under a fresh epoch, atomically with respect
    /// to [`reset_if_signed_out`](Self::reset_if_signed_out).
    fn begin_login(&self) -> u64 {
        let mut epoch = 0;
        self.state_tx.send_modify(|state| {
            epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(from = state.as_str(), to = "authenticating", "session transition");
            *state = SessionState::Authenticating;
        });
        epoch
    }

    fn enter_authenticated(self: &Arc<Self>, epoch: u64, user: User) -> bool {
        if !self.transition(epoch, SessionState::Authenticated(user)) {
            return false;
        }
        self.start_ticker();
        true
    }

    /// Drop stored credentials after a failed recovery.
    fn discard(&self, epoch: u64) {
        if self.epoch() == epoch {
            self.store.clear_all();
        }
        self.transition(epoch, SessionState::Unauthenticated);
    }

    /// Reset to `Unauthenticated` regardless of the current state.
    fn end_local(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.stop_ticker();
        self.state_tx.send_if_modified(|state| {
            if *state == SessionState::Unauthenticated {
                return false;
            }
            *state = SessionState::Unauthenticated;
            true
        });
    }

    /// Drop to `Unauthenticated` if signed in while the store is empty.
    ///
    /// A session-ended notice that arrives after a newer login started, or
    /// after the controller already reset, finds nothing to do.
    fn reset_if_signed_out(&self) -> bool {
        let mut reset = false;
        self.state_tx.send_if_modified(|state| {
            if !state.is_authenticated() || self.store.has_credentials() {
                return false;
            }
            self.epoch.fetch_add(1, Ordering::SeqCst);
            debug!(from = state.as_str(), to = "unauthenticated", "session transition");
            *state = SessionState::Unauthenticated;
            reset = true;
            true
        });
        if reset {
            self.stop_ticker();
        }
        reset
    }

    fn start_ticker(self: &Arc<Self>) {
        let cancel = self.shutdown.child_token();
        if let Some(previous) = self.ticker.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        let session = Arc::downgrade(self);
        let interval = self.check_interval;
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut timer = tokio::time::interval_at(start, interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.proactive_refresh().await;
            }
            debug!("expiry check stopped");
        });
    }

    fn stop_ticker(&self) {
        if let Some(cancel) = self.ticker.lock().take() {
            cancel.cancel();
        }
    }

    /// Refresh ahead of expiry. Failure leaves the session signed in; a later
    /// 401 is what ends it.
    async fn proactive_refresh(&self) {
        let Some(access) = self.store.get_access() else {
            return;
        };
        if !self.inspector.is_expired(&access, self.margin) {
            return;
        }
        let epoch = self.epoch();
        let Some(user) = self.current_user() else {
            return;
        };

        self.transition(epoch, SessionState::Refreshing(user.clone()));
        match self.refresher.refresh().await {
            Ok(_) => debug!("proactive refresh succeeded"),
            Err(e) => warn!(err = %e, "proactive refresh failed"),
        }
        self.transition(epoch, SessionState::Authenticated(user));
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Reset the session whenever any gateway user publishes `SessionEnded`.
fn spawn_session_end_listener(session: &Arc<SessionController>) {
    let mut rx = session.events.subscribe();
    let shutdown = session.shutdown.clone();
    let weak: Weak<SessionController> = Arc::downgrade(session);
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = rx.recv() => event,
            };
            match event {
                Ok(SessionEvent::SessionEnded { reason }) => {
                    let Some(session) = weak.upgrade() else {
                        break;
                    };
                    if session.reset_if_signed_out() {
                        info!(reason = %reason, "session ended");
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });
}

fn superseded() -> ApiError {
    ApiError::new(ErrorCode::NotAuthenticated, "session ended or replaced during login")
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
