//! Two-tier cache: a local in-process tier in front of a durable remote tier.
//!
//! Writes land locally and return immediately. Remote writes happen on a
//! background task, at most one per key at a time; writes that arrive while
//! a key is syncing are coalesced into a single follow-up write.

use crate::local::LocalStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use tripweave_config::CacheConfig;
use tripweave_core::cache::{CacheEntry, CacheLookup, CacheSource, RemoteCache};
use tripweave_core::error::CacheError;
use tripweave_core::event::{DomainEvent, EventBus};

pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(300);
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(2);

/// How a background remote sync ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The remote tier converged; `writes` counts the initial write plus any follow-up.
    Synced { writes: u32 },
    /// The remote write failed. Not retried.
    Failed(String),
    /// A sync for the key was already in flight; it will carry this value.
    Coalesced,
    /// Remote sync is off for this cache.
    Disabled,
}

/// Handle to the background sync scheduled by [`HybridCache::set`].
///
/// Dropping it is fine; the sync runs regardless.
pub struct SyncTicket {
    inner: TicketInner,
}

enum TicketInner {
    Ready(SyncOutcome),
    Pending(oneshot::Receiver<SyncOutcome>),
}

impl SyncTicket {
    fn ready(outcome: SyncOutcome) -> Self {
        Self {
            inner: TicketInner::Ready(outcome),
        }
    }

    /// Wait for the sync to finish.
    pub async fn wait(self) -> SyncOutcome {
        match self.inner {
            TicketInner::Ready(outcome) => outcome,
            TicketInner::Pending(rx) => rx
                .await
                .unwrap_or_else(|_| SyncOutcome::Failed("sync task ended without reporting".into())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteHealth {
    pub backend: String,
    pub enabled: bool,
    /// `None` when the remote tier is not consulted.
    pub healthy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheHealth {
    pub status: HealthStatus,
    pub local_entries: usize,
    pub in_flight: usize,
    pub remote: RemoteHealth,
}

struct SyncSlot {
    generation: u64,
    dirty: bool,
    ttl_seconds: u64,
}

type InFlight = Arc<Mutex<HashMap<String, SyncSlot>>>;

/// Removes a key's in-flight marker if the sync task dies before clearing it.
struct InFlightGuard {
    in_flight: InFlight,
    key: String,
    generation: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if map.get(&self.key).is_some_and(|s| s.generation == self.generation) {
            map.remove(&self.key);
        }
    }
}

/// The hybrid cache. Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct HybridCache {
    local: Arc<LocalStore>,
    remote: Arc<dyn RemoteCache>,
    sync_enabled: bool,
    freshness: Duration,
    remote_timeout: Duration,
    in_flight: InFlight,
    generation: Arc<AtomicU64>,
    tracker: TaskTracker,
    events: Option<Arc<EventBus>>,
}

impl HybridCache {
    /// Create a cache in front of `remote`. Sync is on iff the remote stores anything.
    pub fn new(remote: Arc<dyn RemoteCache>) -> Self {
        let sync_enabled = remote.enabled();
        Self {
            local: Arc::new(LocalStore::new()),
            remote,
            sync_enabled,
            freshness: DEFAULT_FRESHNESS,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
            tracker: TaskTracker::new(),
            events: None,
        }
    }

    /// A cache with no remote tier.
    pub fn local_only() -> Self {
        Self::new(Arc::new(crate::noop::NoopRemote))
    }

    /// Create a cache configured from `[cache]` settings.
    pub fn from_config(config: &CacheConfig, remote: Arc<dyn RemoteCache>) -> Self {
        let sync = config.remote_sync && remote.enabled();
        Self::new(remote)
            .with_freshness(config.freshness())
            .with_remote_timeout(config.remote_timeout())
            .with_sync(sync)
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn with_sync(mut self, enabled: bool) -> Self {
        self.sync_enabled = enabled && self.remote.enabled();
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn remote_enabled(&self) -> bool {
        self.sync_enabled
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Look up `key`, local tier first.
    ///
    /// Remote errors and timeouts degrade to a miss.
    pub async fn get(&self, key: &str) -> CacheLookup {
        if let Some(entry) = self.local.get(key) {
            if entry.is_fresh(self.freshness) {
                let age_ms = entry.age().as_millis() as u64;
                return CacheLookup::hit(entry.value, CacheSource::Local, age_ms);
            }
            self.local.remove_if_written_at(key, entry.written_at);
        }

        if !self.sync_enabled {
            return CacheLookup::miss();
        }

        match self.remote_call(self.remote.get(key)).await {
            Ok(Some(entry)) if !entry.is_expired() => {
                let ttl = match entry.remaining_ttl_secs() {
                    0 => None,
                    secs => Some(Duration::from_secs(secs)),
                };
                self.local.insert(key, entry.value.clone(), ttl);
                debug!(key, backend = self.remote.name(), "Remote cache hit");
                let age_ms = entry.age_ms();
                CacheLookup::hit(entry.value, CacheSource::Remote, age_ms)
            }
            Ok(_) => CacheLookup::miss(),
            Err(e) => {
                warn!(key, backend = self.remote.name(), error = %e, "Remote cache read failed");
                CacheLookup::miss()
            }
        }
    }

    /// Write `value` locally and schedule a remote sync.
    ///
    /// `ttl_seconds == 0` means no expiry beyond the freshness window.
    pub fn set(&self, key: &str, value: serde_json::Value, ttl_seconds: u64) -> SyncTicket {
        let ttl = (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds));
        self.local.insert(key, value, ttl);

        if !self.sync_enabled {
            return SyncTicket::ready(SyncOutcome::Disabled);
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(key, "No async runtime; remote sync skipped");
                return SyncTicket::ready(SyncOutcome::Failed("no async runtime".into()));
            }
        };

        let generation = {
            let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = map.get_mut(key) {
                slot.dirty = true;
                slot.ttl_seconds = ttl_seconds;
                debug!(key, "Remote sync already in flight; coalesced");
                return SyncTicket::ready(SyncOutcome::Coalesced);
            }
            let generation = self.generation.fetch_add(1, Ordering::Relaxed);
            map.insert(
                key.to_string(),
                SyncSlot {
                    generation,
                    dirty: false,
                    ttl_seconds,
                },
            );
            generation
        };

        let (tx, rx) = oneshot::channel();
        let cache = self.clone();
        let key = key.to_string();
        self.tracker.spawn_on(
            async move {
                let outcome = cache.run_sync(key, generation).await;
                let _ = tx.send(outcome);
            },
            &handle,
        );

        SyncTicket {
            inner: TicketInner::Pending(rx),
        }
    }

    async fn run_sync(&self, key: String, generation: u64) -> SyncOutcome {
        let _guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            key: key.clone(),
            generation,
        };

        let mut writes = 0u32;
        let outcome = loop {
            let ttl_seconds = self.slot_ttl(&key).unwrap_or(0);
            let result = match self.local.get(&key) {
                Some(local) => {
                    let entry = CacheEntry::new(key.clone(), local.value, ttl_seconds);
                    self.remote_call(self.remote.set(entry)).await
                }
                None => self.remote_call(self.remote.delete(&key)).await.map(|_| ()),
            };
            writes += 1;

            if let Err(e) = result {
                warn!(key = %key, backend = self.remote.name(), error = %e, "Remote cache sync failed");
                self.release(&key, generation);
                break SyncOutcome::Failed(e.to_string());
            }

            let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            let dirty = map
                .get(&key)
                .filter(|s| s.generation == generation)
                .map(|s| s.dirty);
            match dirty {
                Some(true) => {
                    if let Some(slot) = map.get_mut(&key) {
                        slot.dirty = false;
                    }
                }
                Some(false) => {
                    map.remove(&key);
                    break SyncOutcome::Synced { writes };
                }
                None => break SyncOutcome::Synced { writes },
            }
        };

        debug!(key = %key, ?outcome, "Remote cache sync finished");
        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::CacheSyncCompleted {
                key,
                success: matches!(outcome, SyncOutcome::Synced { .. }),
                timestamp: Utc::now(),
            });
        }
        outcome
    }

    fn slot_ttl(&self, key: &str) -> Option<u64> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|s| s.ttl_seconds)
    }

    fn release(&self, key: &str, generation: u64) {
        let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if map.get(key).is_some_and(|s| s.generation == generation) {
            map.remove(key);
        }
    }

    /// Run one remote operation bounded by `remote_timeout`.
    async fn remote_call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        tokio::time::timeout(self.remote_timeout, fut)
            .await
            .unwrap_or_else(|_| Err(CacheError::Timeout(self.remote_timeout.as_millis() as u64)))
    }

    /// Remove `key` from both tiers. Returns whether either tier held it.
    pub async fn delete(&self, key: &str) -> bool {
        let local = self.local.remove(key);
        if !self.sync_enabled {
            return local;
        }

        {
            let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = map.get_mut(key) {
                // the in-flight task sees the key gone and deletes remotely
                slot.dirty = true;
                return local;
            }
        }

        match self.remote_call(self.remote.delete(key)).await {
            Ok(remote) => local || remote,
            Err(e) => {
                warn!(key, backend = self.remote.name(), error = %e, "Remote cache delete failed");
                local
            }
        }
    }

    /// Drop every entry from both tiers.
    pub async fn clear(&self) {
        self.local.clear();
        if !self.sync_enabled {
            return;
        }
        for slot in self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values_mut()
        {
            slot.dirty = true;
        }
        if let Err(e) = self.remote_call(self.remote.clear()).await {
            warn!(backend = self.remote.name(), error = %e, "Remote cache clear failed");
        }
    }

    /// Report tier status. Healthy iff the remote tier is off or answers healthy.
    pub async fn health_check(&self) -> CacheHealth {
        let (healthy, error) = if self.sync_enabled {
            match self.remote_call(self.remote.health_check()).await {
                Ok(ok) => (Some(ok), None),
                Err(e) => (Some(false), Some(e.to_string())),
            }
        } else {
            (None, None)
        };

        let status = if healthy == Some(false) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        CacheHealth {
            status,
            local_entries: self.local.len(),
            in_flight: self.in_flight_count(),
            remote: RemoteHealth {
                backend: self.remote.name().to_string(),
                enabled: self.sync_enabled,
                healthy,
                error,
            },
        }
    }

    /// Number of keys with a remote sync in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Wait until every scheduled remote sync has finished.
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Drop local entries that are no longer fresh.
    pub fn prune(&self) -> usize {
        self.local.prune(self.freshness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryRemote;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tripweave_core::error::CacheError;

    /// Records concurrency of remote writes per cache.
    #[derive(Default)]
    struct InstrumentedRemote {
        inner: InMemoryRemote,
        current: AtomicUsize,
        max_concurrent: AtomicUsize,
        writes: AtomicUsize,
        delay: Duration,
    }

    impl InstrumentedRemote {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl RemoteCache for InstrumentedRemote {
        fn name(&self) -> &str {
            "instrumented"
        }

        async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
            self.inner.get(key).await
        }

        async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.writes.fetch_add(1, Ordering::SeqCst);
            let result = self.inner.set(entry).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn delete(&self, key: &str) -> Result<bool, CacheError> {
            self.inner.delete(key).await
        }

        async fn clear(&self) -> Result<(), CacheError> {
            self.inner.clear().await
        }

        async fn health_check(&self) -> Result<bool, CacheError> {
            self.inner.health_check().await
        }
    }

    struct HangingRemote;

    #[async_trait]
    impl RemoteCache for HangingRemote {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }

        async fn set(&self, _entry: CacheEntry) -> Result<(), CacheError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            Ok(false)
        }

        async fn clear(&self) -> Result<(), CacheError> {
            Ok(())
        }

        async fn health_check(&self) -> Result<bool, CacheError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(true)
        }
    }

    #[tokio::test]
    async fn set_then_get_reads_local() {
        let cache = HybridCache::local_only();
        let ticket = cache.set("k", serde_json::json!({"v": 1}), 0);
        assert_eq!(ticket.wait().await, SyncOutcome::Disabled);

        let hit = cache.get("k").await;
        assert!(hit.found);
        assert_eq!(hit.source, CacheSource::Local);
        assert_eq!(hit.value.unwrap()["v"], 1);
    }

    #[tokio::test]
    async fn miss_when_absent_everywhere() {
        let cache = HybridCache::new(Arc::new(InMemoryRemote::new()));
        let lookup = cache.get("missing").await;
        assert!(!lookup.found);
        assert_eq!(lookup.source, CacheSource::None);
    }

    #[tokio::test]
    async fn stale_local_falls_through_to_remote() {
        let remote = Arc::new(InMemoryRemote::new());
        let cache = HybridCache::new(remote.clone()).with_freshness(Duration::ZERO);

        let outcome = cache.set("k", serde_json::json!("v"), 60).wait().await;
        assert_eq!(outcome, SyncOutcome::Synced { writes: 1 });
        assert_eq!(remote.len().await, 1);

        let lookup = cache.get("k").await;
        assert!(lookup.found);
        assert_eq!(lookup.source, CacheSource::Remote);
        assert_eq!(lookup.value.unwrap(), "v");
    }

    #[tokio::test]
    async fn remote_outage_degrades_to_miss() {
        let remote = Arc::new(InMemoryRemote::new());
        let cache = HybridCache::new(remote.clone()).with_freshness(Duration::ZERO);
        cache.set("k", serde_json::json!(1), 0).wait().await;

        remote.set_available(false);
        let lookup = cache.get("k").await;
        assert!(!lookup.found);
    }

    #[tokio::test]
    async fn huge_ttl_means_no_expiry() {
        let remote = Arc::new(InMemoryRemote::new());
        let cache = HybridCache::new(remote.clone());

        let outcome = cache.set("k", serde_json::json!(1), u64::MAX).wait().await;
        assert_eq!(outcome, SyncOutcome::Synced { writes: 1 });
        assert_eq!(cache.get("k").await.source, CacheSource::Local);

        let reader = HybridCache::new(remote).with_freshness(Duration::ZERO);
        let lookup = reader.get("k").await;
        assert_eq!(lookup.source, CacheSource::Remote);
        assert_eq!(lookup.value.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_read_is_bounded_by_timeout() {
        let cache = HybridCache::new(Arc::new(HangingRemote))
            .with_remote_timeout(Duration::from_millis(50));
        let started = tokio::time::Instant::now();
        let lookup = cache.get("k").await;
        assert!(!lookup.found);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_remote_reports_timeout_in_health() {
        let cache = HybridCache::new(Arc::new(HangingRemote))
            .with_remote_timeout(Duration::from_millis(50));
        let health = cache.health_check().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(
            health.remote.error.as_deref(),
            Some("Remote cache operation timed out after 50ms")
        );
    }

    #[tokio::test]
    async fn one_sync_in_flight_per_key() {
        let remote = Arc::new(InstrumentedRemote::with_delay(Duration::from_millis(20)));
        let cache = HybridCache::new(remote.clone());

        let mut tickets = Vec::new();
        for i in 0..10 {
            tickets.push(cache.set("hot", serde_json::json!(i), 0));
        }
        assert_eq!(cache.in_flight_count(), 1);

        let mut outcomes = Vec::new();
        for ticket in tickets {
            outcomes.push(ticket.wait().await);
        }
        cache.flush().await;

        assert_eq!(remote.max_concurrent.load(Ordering::SeqCst), 1);
        assert_eq!(outcomes[0], SyncOutcome::Synced { writes: 2 });
        assert!(outcomes[1..].iter().all(|o| *o == SyncOutcome::Coalesced));
        assert_eq!(remote.writes.load(Ordering::SeqCst), 2);
        assert_eq!(remote.inner.get("hot").await.unwrap().unwrap().value, 9);
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_sync_independently() {
        let remote = Arc::new(InstrumentedRemote::with_delay(Duration::from_millis(5)));
        let cache = HybridCache::new(remote.clone());
        cache.set("a", serde_json::json!(1), 0);
        cache.set("b", serde_json::json!(2), 0);
        assert_eq!(cache.in_flight_count(), 2);
        cache.flush().await;
        assert_eq!(remote.writes.load(Ordering::SeqCst), 2);
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn delete_during_sync_removes_remote_copy() {
        let remote = Arc::new(InstrumentedRemote::with_delay(Duration::from_millis(10)));
        let cache = HybridCache::new(remote.clone());

        cache.set("k", serde_json::json!(1), 0);
        assert!(cache.delete("k").await);
        cache.flush().await;

        assert!(remote.inner.get("k").await.unwrap().is_none());
        assert!(!cache.get("k").await.found);
    }

    #[tokio::test]
    async fn failed_sync_is_not_retried() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.set_available(false);
        let cache = HybridCache::new(remote.clone());

        let outcome = cache.set("k", serde_json::json!(1), 0).wait().await;
        assert!(matches!(outcome, SyncOutcome::Failed(_)));
        assert_eq!(cache.in_flight_count(), 0);

        // local tier still answers
        assert!(cache.get("k").await.found);

        remote.set_available(true);
        cache.flush().await;
        assert!(remote.is_empty().await);
    }

    #[tokio::test]
    async fn health_reflects_remote_tier() {
        assert_eq!(HybridCache::local_only().health_check().await.status, HealthStatus::Healthy);

        let remote = Arc::new(InMemoryRemote::new());
        let cache = HybridCache::new(remote.clone());
        cache.set("k", serde_json::json!(1), 0).wait().await;
        let health = cache.health_check().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.local_entries, 1);
        assert_eq!(health.remote.healthy, Some(true));

        remote.set_available(false);
        assert_eq!(cache.health_check().await.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn clear_empties_both_tiers() {
        let remote = Arc::new(InMemoryRemote::new());
        let cache = HybridCache::new(remote.clone());
        cache.set("a", serde_json::json!(1), 0).wait().await;
        cache.set("b", serde_json::json!(2), 0).wait().await;
        cache.clear().await;
        cache.flush().await;
        assert!(remote.is_empty().await);
        assert!(!cache.get("a").await.found);
    }

    #[tokio::test]
    async fn sync_completion_is_published() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let cache = HybridCache::new(Arc::new(InMemoryRemote::new())).with_event_bus(bus);
        cache.set("k", serde_json::json!(1), 0).wait().await;

        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::CacheSyncCompleted { key, success, .. } => {
                assert_eq!(key, "k");
                assert!(success);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
