//! Short-lived authorization state.
//!
//! Each authorization redirect carries an opaque CSRF token mapping to the
//! request's redirect URI, scopes, and optional PKCE verifier. Entries are
//! single-use: `consume` removes and returns atomically, and expired
//! entries are swept lazily on every operation.

use crate::clock::{Clock, MonotonicClock};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default lifetime of a state entry.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(600);

/// Metadata bound to one authorization handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub pkce_verifier: Option<String>,
}

/// Storage for pending authorization state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store `entry` under a fresh random token and return the token.
    async fn generate(&self, entry: StateEntry) -> String;

    /// Remove and return the entry, or `None` when unknown or expired.
    async fn consume(&self, token: &str) -> Option<StateEntry>;
}

struct StoredState {
    entry: StateEntry,
    created_at: u64,
}

/// Process-local state store.
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, StoredState>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_STATE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Pending (unexpired) entry count.
    pub fn len(&self) -> usize {
        let mut entries = self.lock();
        self.sweep(&mut entries);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredState>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sweep(&self, entries: &mut HashMap<String, StoredState>) {
        let now = self.clock.now_millis();
        let ttl = self.ttl.as_millis() as u64;
        entries.retain(|_, stored| now.saturating_sub(stored.created_at) < ttl);
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn generate(&self, entry: StateEntry) -> String {
        // 32 random bytes: twice the 128-bit minimum.
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        let mut entries = self.lock();
        self.sweep(&mut entries);
        let _ = entries.insert(
            token.clone(),
            StoredState { entry, created_at: self.clock.now_millis() },
        );
        token
    }

    async fn consume(&self, token: &str) -> Option<StateEntry> {
        let mut entries = self.lock();
        self.sweep(&mut entries);
        entries.remove(token).map(|stored| stored.entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn entry() -> StateEntry {
        StateEntry {
            redirect_uri: "https://app.example.com/callback".to_string(),
            scopes: vec!["read".to_string()],
            pkce_verifier: Some("verifier".to_string()),
        }
    }

    #[tokio::test]
    async fn consume_is_one_shot() {
        let store = MemoryStateStore::new();
        let token = store.generate(entry()).await;

        assert_eq!(store.consume(&token).await, Some(entry()));
        assert_eq!(store.consume(&token).await, None);
    }

    #[tokio::test]
    async fn unknown_token_returns_none() {
        let store = MemoryStateStore::new();
        assert_eq!(store.consume("nope").await, None);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let clock = ManualClock::new();
        let store = MemoryStateStore::with_ttl(Duration::from_secs(600)).with_clock(clock.clone());
        let token = store.generate(entry()).await;

        clock.advance(599_000);
        assert_eq!(store.len(), 1);

        clock.advance(2_000);
        assert_eq!(store.consume(&token).await, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn tokens_are_unique_and_long() {
        let store = MemoryStateStore::new();
        let a = store.generate(entry()).await;
        let b = store.generate(entry()).await;
        assert_ne!(a, b);
        // 32 bytes base64url = 43 chars, comfortably above 128 bits.
        assert_eq!(a.len(), 43);
    }
}
