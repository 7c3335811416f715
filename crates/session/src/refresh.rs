// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight credential refresh.
//!
//! At most one `POST /auth/refresh` is outstanding per coordinator. Callers
//! arriving while it is in flight await the same shared outcome. The exchange
//! runs on its own task so it completes even if every caller goes away.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::AuthApi;
use crate::error::RefreshError;
use crate::event::SessionEvent;
use crate::store::{TokenPair, TokenStore};

pub type RefreshOutcome = Result<TokenPair, RefreshError>;

type Flight = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    id: u64,
    generation: u64,
    flight: Flight,
}

type Slot = Arc<Mutex<Option<InFlight>>>;

/// Exchanges the stored refresh credential for a new pair, one exchange at a time.
pub struct RefreshCoordinator {
    store: Arc<TokenStore>,
    api: Arc<AuthApi>,
    events: broadcast::Sender<SessionEvent>,
    in_flight: Slot,
    next_id: AtomicU64,
    network_refreshes: AtomicU32,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<TokenStore>,
        api: Arc<AuthApi>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            store,
            api,
            events,
            in_flight: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
            network_refreshes: AtomicU32::new(0),
        }
    }

    /// Refresh the stored pair, joining an in-flight refresh if there is one.
    ///
    /// Fails without a network call when no refresh credential is stored. On
    /// success both credentials have been written before this returns.
    pub async fn refresh(&self) -> RefreshOutcome {
        let flight = self.join_or_start()?;
        flight.await
    }

    /// Number of refresh exchanges actually sent to the server.
    pub fn refresh_count(&self) -> u32 {
        self.network_refreshes.load(Ordering::Relaxed)
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    fn join_or_start(&self) -> Result<Flight, RefreshError> {
        let mut slot = self.in_flight.lock();
        let Some((refresh_token, generation)) = self.store.refresh_with_generation() else {
            debug!("no refresh token stored, not refreshing");
            return Err(RefreshError::NoRefreshToken);
        };
        // A flight from an earlier session cannot serve this one.
        if let Some(current) = slot.as_ref().filter(|f| f.generation == generation) {
            debug!("joining in-flight refresh");
            return Ok(current.flight.clone());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.network_refreshes.fetch_add(1, Ordering::Relaxed);

        let exchange = Exchange {
            store: Arc::clone(&self.store),
            api: Arc::clone(&self.api),
            events: self.events.clone(),
            slot: Arc::clone(&self.in_flight),
            id,
            generation,
        };
        let task = tokio::spawn(exchange.run(refresh_token));
        let flight = async move {
            task.await
                .unwrap_or_else(|e| Err(RefreshError::Network(format!("refresh task failed: {e}"))))
        }
        .boxed()
        .shared();

        *slot = Some(InFlight { id, generation, flight: flight.clone() });
        Ok(flight)
    }
}

/// One network exchange, detached from its callers.
struct Exchange {
    store: Arc<TokenStore>,
    api: Arc<AuthApi>,
    events: broadcast::Sender<SessionEvent>,
    slot: Slot,
    id: u64,
    generation: u64,
}

impl Exchange {
    async fn run(self, refresh_token: String) -> RefreshOutcome {
        let outcome = match self.api.refresh(&refresh_token).await {
            Ok(pair) => {
                if self.store.replace_pair_if(self.generation, &pair) {
                    info!("credentials refreshed");
                    let _ = self.events.send(SessionEvent::Refreshed);
                    Ok(pair)
                } else {
                    debug!("credentials cleared during refresh, discarding new pair");
                    Err(RefreshError::SessionCleared)
                }
            }
            Err(e) => {
                warn!(err = %e, "credential refresh failed");
                Err(e)
            }
        };

        // Release the slot before waiters observe the outcome, so the next
        // caller after completion starts a fresh exchange.
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|f| f.id == self.id) {
            *slot = None;
        }
        outcome
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
