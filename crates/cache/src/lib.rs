//! Hybrid cache implementations for Tripweave.

pub mod hybrid;
pub mod in_memory;
pub mod local;
pub mod noop;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use hybrid::{CacheHealth, HealthStatus, HybridCache, RemoteHealth, SyncOutcome, SyncTicket};
pub use in_memory::InMemoryRemote;
pub use local::LocalStore;
pub use noop::NoopRemote;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRemote;

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;
use tripweave_config::CacheConfig;
use tripweave_core::cache::RemoteCache;
use tripweave_core::error::CacheError;

/// Derive a stable cache key: `namespace:sha256(value)`.
pub fn cache_key(namespace: &str, value: &serde_json::Value) -> String {
    format!("{namespace}:{:x}", Sha256::digest(value.to_string().as_bytes()))
}

/// Open the remote tier named by `config.remote_backend`.
///
/// Returns a [`NoopRemote`] when remote sync is off.
pub async fn build_remote(config: &CacheConfig) -> Result<Arc<dyn RemoteCache>, CacheError> {
    if !config.remote_sync {
        return Ok(Arc::new(NoopRemote));
    }

    match config.remote_backend.as_str() {
        "none" => Ok(Arc::new(NoopRemote)),
        "memory" => Ok(Arc::new(InMemoryRemote::new())),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = config.sqlite_path();
            if let Some(parent) = std::path::Path::new(&path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CacheError::Storage(format!("cache dir {}: {e}", parent.display())))?;
            }
            let remote = SqliteRemote::new(&format!("sqlite://{path}")).await?;
            Ok(Arc::new(remote))
        }
        other => Err(CacheError::Unavailable(format!("unknown remote backend '{other}'"))),
    }
}

/// Build a [`HybridCache`] from `[cache]` settings.
///
/// A remote tier that fails to open degrades to local-only with a warning.
pub async fn build_from_config(config: &CacheConfig) -> HybridCache {
    let remote = match build_remote(config).await {
        Ok(remote) => remote,
        Err(e) => {
            warn!(backend = %config.remote_backend, error = %e, "Remote cache unavailable; running local-only");
            Arc::new(NoopRemote)
        }
    };
    HybridCache::from_config(config, remote)
}
