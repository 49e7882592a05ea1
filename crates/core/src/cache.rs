//! Cache types and the remote (durable) tier trait.
//!
//! The hybrid cache keeps a local in-process tier in front of a
//! [`RemoteCache`]. Remote implementations: no-op, in-memory, SQLite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::CacheError;

/// Which tier answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    Local,
    Remote,
    None,
}

/// A stored cache value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,

    pub value: serde_json::Value,

    /// When the value was written
    pub written_at: DateTime<Utc>,

    /// Absolute expiry derived from the TTL, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default = "default_source")]
    pub source: CacheSource,
}

fn default_source() -> CacheSource {
    CacheSource::Remote
}

impl CacheEntry {
    /// Create an entry written now, expiring after `ttl_seconds` (0 = never).
    pub fn new(key: impl Into<String>, value: serde_json::Value, ttl_seconds: u64) -> Self {
        let written_at = Utc::now();
        // A TTL past the representable range means no expiry
        let expires_at = (ttl_seconds > 0)
            .then(|| i64::try_from(ttl_seconds).ok())
            .flatten()
            .and_then(chrono::TimeDelta::try_seconds)
            .and_then(|ttl| written_at.checked_add_signed(ttl));
        Self {
            key: key.into(),
            value,
            written_at,
            expires_at,
            source: CacheSource::Remote,
        }
    }

    /// Whether the entry's TTL has elapsed.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }

    /// Milliseconds since the entry was written.
    pub fn age_ms(&self) -> u64 {
        (Utc::now() - self.written_at).num_milliseconds().max(0) as u64
    }

    /// Remaining TTL in whole seconds (0 = no expiry).
    pub fn remaining_ttl_secs(&self) -> u64 {
        match self.expires_at {
            Some(at) => (at - Utc::now()).num_seconds().max(1) as u64,
            None => 0,
        }
    }
}

/// The answer to a hybrid cache `get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheLookup {
    pub found: bool,

    #[serde(default)]
    pub value: Option<serde_json::Value>,

    pub source: CacheSource,

    pub age_ms: u64,
}

impl CacheLookup {
    pub fn miss() -> Self {
        Self {
            found: false,
            value: None,
            source: CacheSource::None,
            age_ms: 0,
        }
    }

    pub fn hit(value: serde_json::Value, source: CacheSource, age_ms: u64) -> Self {
        Self {
            found: true,
            value: Some(value),
            source,
            age_ms,
        }
    }
}

/// The remote, durable cache tier.
///
/// Every method may fail; the hybrid cache degrades failures to misses.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Backend name (e.g., "sqlite", "memory", "none").
    fn name(&self) -> &str;

    /// Whether this backend actually stores anything.
    fn enabled(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> std::result::Result<Option<CacheEntry>, CacheError>;

    async fn set(&self, entry: CacheEntry) -> std::result::Result<(), CacheError>;

    async fn delete(&self, key: &str) -> std::result::Result<bool, CacheError>;

    async fn clear(&self) -> std::result::Result<(), CacheError>;

    async fn health_check(&self) -> std::result::Result<bool, CacheError>;
}
