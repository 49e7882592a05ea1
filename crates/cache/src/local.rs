//! Local in-process cache tier.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// A value held in the local tier.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub value: serde_json::Value,
    pub written_at: Instant,
    pub expires_at: Option<Instant>,
}

impl LocalEntry {
    pub fn age(&self) -> Duration {
        self.written_at.elapsed()
    }

    /// Fresh when younger than the window and inside its own TTL.
    pub fn is_fresh(&self, window: Duration) -> bool {
        self.age() < window && self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

/// Key-value map guarded by a synchronous lock; no lock is held across `.await`.
#[derive(Default)]
pub struct LocalStore {
    entries: RwLock<HashMap<String, LocalEntry>>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        let now = Instant::now();
        let entry = LocalEntry {
            value,
            written_at: now,
            // Past the representable range means no expiry
            expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), entry);
    }

    pub fn get(&self, key: &str) -> Option<LocalEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Remove `key` only if it still holds the entry written at `written_at`,
    /// so a concurrent fresh write is never discarded.
    pub fn remove_if_written_at(&self, key: &str, written_at: Instant) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).is_some_and(|e| e.written_at == written_at) {
            entries.remove(key);
            true
        } else {
            false
        }
    }

    /// Drop every entry that is no longer fresh. Returns how many were dropped.
    pub fn prune(&self, window: Duration) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, e| e.is_fresh(window));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
