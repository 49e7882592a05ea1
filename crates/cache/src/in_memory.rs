//! In-memory remote tier: useful for testing and single-process deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tripweave_core::cache::{CacheEntry, CacheSource, RemoteCache};
use tripweave_core::error::CacheError;

/// A remote tier backed by a process-local map.
///
/// Honors entry TTLs. Availability can be toggled to exercise the
/// degraded paths of the hybrid cache.
pub struct InMemoryRemote {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    available: AtomicBool,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn ensure_available(&self) -> Result<(), CacheError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable("in-memory remote marked unavailable".into()))
        }
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteCache for InMemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        self.ensure_available()?;
        let entry = self.entries.read().await.get(key).cloned();
        match entry {
            Some(e) if e.is_expired() => {
                self.entries.write().await.remove(key);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn set(&self, mut entry: CacheEntry) -> Result<(), CacheError> {
        self.ensure_available()?;
        entry.source = CacheSource::Remote;
        self.entries.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.ensure_available()?;
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.ensure_available()?;
        self.entries.write().await.clear();
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, CacheError> {
        Ok(self.available.load(Ordering::SeqCst))
    }
}
