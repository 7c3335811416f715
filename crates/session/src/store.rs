// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential storage: the current access/refresh pair with pluggable persistence.
//!
//! The pair is only ever replaced as a whole or cleared as a whole by the
//! session core. Every `clear_all` bumps a generation counter so work that
//! started before a logout can detect it and drop its result.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Storage key for the access credential.
pub const ACCESS_KEY: &str = "access_token";
/// Storage key for the refresh credential.
pub const REFRESH_KEY: &str = "refresh_token";

/// An access/refresh credential pair.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self { access: access.into(), refresh: refresh.into() }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// The two persisted slots. Either may be absent.
#[derive(Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl StoredTokens {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Persistence for [`StoredTokens`].
pub trait TokenBackend: Send + Sync {
    fn load(&self) -> anyhow::Result<StoredTokens>;
    fn save(&self, tokens: &StoredTokens) -> anyhow::Result<()>;
}

impl<B: TokenBackend + ?Sized> TokenBackend for Arc<B> {
    fn load(&self) -> anyhow::Result<StoredTokens> {
        (**self).load()
    }

    fn save(&self, tokens: &StoredTokens) -> anyhow::Result<()> {
        (**self).save(tokens)
    }
}

/// Process-local backend. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryBackend {
    tokens: Mutex<StoredTokens>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-populated with the given slots.
    pub fn seeded(tokens: StoredTokens) -> Self {
        Self { tokens: Mutex::new(tokens) }
    }
}

impl TokenBackend for MemoryBackend {
    fn load(&self) -> anyhow::Result<StoredTokens> {
        Ok(self.tokens.lock().clone())
    }

    fn save(&self, tokens: &StoredTokens) -> anyhow::Result<()> {
        *self.tokens.lock() = tokens.clone();
        Ok(())
    }
}

/// JSON file backend (`tokens.json` under a state directory).
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(state_dir: &Path) -> Self {
        Self { path: state_dir.join("tokens.json") }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenBackend for FileBackend {
    fn load(&self) -> anyhow::Result<StoredTokens> {
        if !self.path.exists() {
            return Ok(StoredTokens::default());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let tokens: StoredTokens = serde_json::from_str(&contents)?;
        Ok(tokens)
    }

    /// Write tmp + rename so a crash never leaves a half-written file.
    fn save(&self, tokens: &StoredTokens) -> anyhow::Result<()> {
        if tokens.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        }
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(tokens)?;
        let tmp_name = format!(
            "{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
        );
        let tmp_path = self.path.with_file_name(tmp_name);
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

struct Slots {
    tokens: StoredTokens,
    generation: u64,
}

/// Holder for the current credential slots.
///
/// Writes go through to the backend while the lock is held, so persisted
/// state always matches the in-memory order of updates.
pub struct TokenStore {
    slots: Mutex<Slots>,
    backend: Box<dyn TokenBackend>,
}

impl TokenStore {
    /// Create a store, loading whatever the backend holds.
    ///
    /// An unreadable backend starts empty rather than failing.
    pub fn new(backend: impl TokenBackend + 'static) -> Self {
        let tokens = match backend.load() {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(err = %e, "failed to load stored credentials, starting empty");
                StoredTokens::default()
            }
        };
        Self { slots: Mutex::new(Slots { tokens, generation: 0 }), backend: Box::new(backend) }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    pub fn get_access(&self) -> Option<String> {
        self.slots.lock().tokens.access_token.clone()
    }

    pub fn set_access(&self, token: impl Into<String>) {
        let mut slots = self.slots.lock();
        slots.tokens.access_token = Some(token.into());
        self.persist(&slots.tokens);
    }

    pub fn get_refresh(&self) -> Option<String> {
        self.slots.lock().tokens.refresh_token.clone()
    }

    pub fn set_refresh(&self, token: impl Into<String>) {
        let mut slots = self.slots.lock();
        slots.tokens.refresh_token = Some(token.into());
        self.persist(&slots.tokens);
    }

    /// The refresh credential together with the generation it was read at.
    pub fn refresh_with_generation(&self) -> Option<(String, u64)> {
        let slots = self.slots.lock();
        slots.tokens.refresh_token.clone().map(|token| (token, slots.generation))
    }

    /// Both slots, if both are present.
    pub fn pair(&self) -> Option<TokenPair> {
        let slots = self.slots.lock();
        let access = slots.tokens.access_token.clone()?;
        let refresh = slots.tokens.refresh_token.clone()?;
        Some(TokenPair { access, refresh })
    }

    /// Whether either slot holds a value.
    pub fn has_credentials(&self) -> bool {
        !self.slots.lock().tokens.is_empty()
    }

    /// Session counter. Bumped by [`clear_all`](Self::clear_all) and
    /// [`install_pair_if`](Self::install_pair_if), never by a refresh.
    pub fn generation(&self) -> u64 {
        self.slots.lock().generation
    }

    /// Replace both slots at once.
    pub fn replace_pair(&self, pair: &TokenPair) {
        let mut slots = self.slots.lock();
        Self::write_pair(&mut slots, pair);
        self.persist(&slots.tokens);
    }

    /// Replace both slots unless the store was cleared since `generation`.
    ///
    /// Returns whether the pair was written.
    pub fn replace_pair_if(&self, generation: u64, pair: &TokenPair) -> bool {
        let mut slots = self.slots.lock();
        if slots.generation != generation {
            return false;
        }
        Self::write_pair(&mut slots, pair);
        self.persist(&slots.tokens);
        true
    }

    /// Start a new session with `pair` unless the store moved on since `generation`.
    ///
    /// Bumps the generation, so refreshes begun under the previous session
    /// can no longer write. Returns whether the pair was written.
    pub fn install_pair_if(&self, generation: u64, pair: &TokenPair) -> bool {
        let mut slots = self.slots.lock();
        if slots.generation != generation {
            return false;
        }
        slots.generation += 1;
        Self::write_pair(&mut slots, pair);
        self.persist(&slots.tokens);
        true
    }

    /// Empty both slots if the store is still at `generation`.
    ///
    /// Returns whether anything was removed.
    pub fn clear_if(&self, generation: u64) -> bool {
        let mut slots = self.slots.lock();
        if slots.generation != generation {
            return false;
        }
        self.clear_locked(&mut slots)
    }

    /// Empty both slots. Returns whether anything was stored.
    pub fn clear_all(&self) -> bool {
        let mut slots = self.slots.lock();
        self.clear_locked(&mut slots)
    }

    fn clear_locked(&self, slots: &mut Slots) -> bool {
        slots.generation += 1;
        let had_credentials = !slots.tokens.is_empty();
        slots.tokens = StoredTokens::default();
        self.persist(&slots.tokens);
        had_credentials
    }

    fn write_pair(slots: &mut Slots, pair: &TokenPair) {
        slots.tokens.access_token = Some(pair.access.clone());
        slots.tokens.refresh_token = Some(pair.refresh.clone());
    }

    fn persist(&self, tokens: &StoredTokens) {
        if let Err(e) = self.backend.save(tokens) {
            tracing::warn!(err = %e, "failed to persist credentials");
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
