//! No-op remote tier: disables remote caching entirely.

use async_trait::async_trait;
use tripweave_core::cache::{CacheEntry, RemoteCache};
use tripweave_core::error::CacheError;

/// A remote tier that stores nothing. The hybrid cache runs local-only.
pub struct NoopRemote;

#[async_trait]
impl RemoteCache for NoopRemote {
    fn name(&self) -> &str {
        "none"
    }

    fn enabled(&self) -> bool {
        false
    }

    async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _entry: CacheEntry) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
        Ok(false)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, CacheError> {
        Ok(true)
    }
}
