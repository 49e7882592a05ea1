//! Parallel capability dispatch under one request deadline.
//!
//! Every capability runs concurrently. Each provider call is bounded by the
//! smaller of the remaining request budget and the provider's own timeout
//! hint. Failures are retried on the next provider in priority order;
//! timeouts are not retried. When the deadline passes, whatever has not
//! finished is recorded as timed out.

use chrono::Utc;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tripweave_cache::{HybridCache, cache_key};
use tripweave_config::OrchestratorConfig;
use tripweave_core::error::ProviderError;
use tripweave_core::event::{DomainEvent, EventBus};
use tripweave_core::provider::{CapabilityProvider, FailureKind, ProviderContext, ProviderResult};
use tripweave_skills::SkillExecutor;

/// Retry and caching knobs for one dispatch.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub cache_results: bool,
    pub result_ttl_secs: u64,
}

impl From<&OrchestratorConfig> for DispatchPolicy {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
            cache_results: config.cache_results,
            result_ttl_secs: config.result_ttl_secs,
        }
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

/// A capability and the providers that may serve it, highest priority first.
#[derive(Clone)]
pub struct CapabilityPlan {
    pub capability: String,
    pub providers: Vec<Arc<dyn CapabilityProvider>>,
}

impl CapabilityPlan {
    fn primary_name(&self) -> &str {
        self.providers.first().map_or("none", |p| p.name())
    }
}

impl std::fmt::Debug for CapabilityPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("CapabilityPlan")
            .field("capability", &self.capability)
            .field("providers", &names)
            .finish()
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Runs capability plans for one request.
pub struct Dispatcher<'a> {
    executor: &'a SkillExecutor,
    cache: &'a HybridCache,
    policy: &'a DispatchPolicy,
    events: &'a EventBus,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        executor: &'a SkillExecutor,
        cache: &'a HybridCache,
        policy: &'a DispatchPolicy,
        events: &'a EventBus,
    ) -> Self {
        Self {
            executor,
            cache,
            policy,
            events,
        }
    }

    /// Run every plan concurrently and collect one result per capability.
    ///
    /// On deadline expiry the outstanding calls are dropped and
    /// `base.cancellation` is cancelled.
    pub async fn dispatch(
        &self,
        plans: &[CapabilityPlan],
        base: &ProviderContext,
        deadline: Instant,
    ) -> BTreeMap<String, ProviderResult> {
        let started = Instant::now();
        let mut results = BTreeMap::new();

        let mut pending: FuturesUnordered<_> = plans
            .iter()
            .map(|plan| async move { (plan, self.invoke(plan, base, deadline).await) })
            .collect();

        let mut expired = false;
        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((plan, result))) => {
                    self.publish(base, &plan.capability, &result);
                    results.insert(plan.capability.clone(), result);
                }
                Ok(None) => break,
                Err(_) => {
                    expired = true;
                    break;
                }
            }
        }
        drop(pending);

        if expired {
            base.cancellation.cancel();
            let elapsed = elapsed_ms(started);
            for plan in plans {
                if results.contains_key(&plan.capability) {
                    continue;
                }
                warn!(
                    request_id = %base.request_id,
                    capability = %plan.capability,
                    elapsed_ms = elapsed,
                    "Capability abandoned at request deadline"
                );
                let result = ProviderResult::timeout(plan.primary_name(), elapsed);
                self.publish(base, &plan.capability, &result);
                results.insert(plan.capability.clone(), result);
            }
        }

        results
    }

    fn publish(&self, base: &ProviderContext, capability: &str, result: &ProviderResult) {
        self.events.publish(DomainEvent::CapabilityDispatched {
            request_id: base.request_id.clone(),
            capability: capability.to_string(),
            provider: result.provider_name.clone(),
            success: result.success,
            timed_out: result.is_timeout(),
            cached: result.cached,
            attempts: result.attempts,
            duration_ms: result.elapsed_ms,
            timestamp: Utc::now(),
        });
    }

    /// Cache key for a plan, when its primary provider's results may be cached.
    fn cache_key(&self, plan: &CapabilityPlan, base: &ProviderContext) -> Option<String> {
        let primary = plan.providers.first()?;
        if !self.policy.cache_results || !primary.cacheable() || primary.is_stub() {
            return None;
        }
        Some(cache_key(
            &plan.capability,
            &serde_json::json!({
                "message": base.message,
                "params": base.params,
            }),
        ))
    }

    /// Exponential backoff before retry number `retry` (0-based).
    fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.policy
            .retry_backoff
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
    }

    async fn invoke(&self, plan: &CapabilityPlan, base: &ProviderContext, deadline: Instant) -> ProviderResult {
        let started = Instant::now();
        let Some(last) = plan.providers.len().checked_sub(1) else {
            return ProviderResult::failed("none", FailureKind::Error, "no provider registered", 0);
        };

        let key = self.cache_key(plan, base);
        if let Some(key) = &key {
            let lookup = self.cache.get(key).await;
            if let Some(cached) = lookup.value.filter(|_| lookup.found) {
                debug!(capability = %plan.capability, source = ?lookup.source, "Served from cache");
                let provider = cached["provider"].as_str().unwrap_or(plan.primary_name()).to_string();
                let mut result = ProviderResult::ok(provider, cached["payload"].clone(), elapsed_ms(started));
                result.cached = true;
                result.attempts = 0;
                return result;
            }
        }

        let mut attempts = 0u32;
        loop {
            let provider = &plan.providers[(attempts as usize).min(last)];
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let mut result = ProviderResult::failed(
                    provider.name(),
                    FailureKind::Cancelled,
                    "timeout",
                    elapsed_ms(started),
                );
                result.attempts = attempts;
                return result;
            }

            let budget = provider.timeout_hint().map_or(remaining, |hint| hint.min(remaining));
            let mut ctx = base.clone();
            ctx.capability = plan.capability.clone();
            ctx.attempt = attempts + 1;

            let outcome = tokio::time::timeout(budget, self.executor.invoke_provider(provider.as_ref(), ctx)).await;
            attempts += 1;

            let error = match outcome {
                Ok(Ok(output)) => {
                    let stub = provider.is_stub()
                        || output.payload.get("stub").and_then(|v| v.as_bool()) == Some(true);
                    if let Some(key) = &key
                        && provider.cacheable()
                        && !stub
                    {
                        self.cache.set(
                            key,
                            serde_json::json!({
                                "provider": provider.name(),
                                "payload": output.payload,
                            }),
                            self.policy.result_ttl_secs,
                        );
                    }
                    let mut result = ProviderResult::ok(provider.name(), output.payload, elapsed_ms(started));
                    result.attempts = attempts;
                    result.stub = stub;
                    return result;
                }
                Ok(Err(ProviderError::Timeout { .. })) | Err(_) => {
                    warn!(
                        capability = %plan.capability,
                        provider = provider.name(),
                        budget_ms = budget.as_millis() as u64,
                        "Provider timed out"
                    );
                    let mut result = ProviderResult::timeout(provider.name(), elapsed_ms(started));
                    result.attempts = attempts;
                    return result;
                }
                Ok(Err(e)) => e,
            };

            let kind = match error {
                ProviderError::Panicked { .. } => FailureKind::Panic,
                _ => FailureKind::Error,
            };
            let fail = |attempts| {
                let mut result = ProviderResult::failed(provider.name(), kind, error.to_string(), elapsed_ms(started));
                result.attempts = attempts;
                result
            };

            if attempts > self.policy.max_retries {
                warn!(
                    capability = %plan.capability,
                    provider = provider.name(),
                    attempts,
                    error = %error,
                    "Capability failed"
                );
                return fail(attempts);
            }

            let wait = self.backoff(attempts - 1);
            if wait >= deadline.saturating_duration_since(Instant::now()) {
                warn!(
                    capability = %plan.capability,
                    provider = provider.name(),
                    "No budget left to retry"
                );
                return fail(attempts);
            }

            info!(
                capability = %plan.capability,
                provider = provider.name(),
                attempt = attempts,
                backoff_ms = wait.as_millis() as u64,
                error = %error,
                "Retrying capability"
            );
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;

    fn plan(capability: &str, providers: Vec<Arc<dyn CapabilityProvider>>) -> CapabilityPlan {
        CapabilityPlan {
            capability: capability.into(),
            providers,
        }
    }

    struct Fixture {
        executor: SkillExecutor,
        cache: HybridCache,
        policy: DispatchPolicy,
        events: EventBus,
    }

    impl Fixture {
        fn new(policy: DispatchPolicy) -> Self {
            Self {
                executor: SkillExecutor::default(),
                cache: HybridCache::local_only(),
                policy,
                events: EventBus::default(),
            }
        }

        fn dispatcher(&self) -> Dispatcher<'_> {
            Dispatcher::new(&self.executor, &self.cache, &self.policy, &self.events)
        }
    }

    fn no_cache() -> DispatchPolicy {
        DispatchPolicy {
            cache_results: false,
            ..DispatchPolicy::default()
        }
    }

    fn deadline(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[tokio::test]
    async fn runs_capabilities_and_keys_by_capability() {
        let fx = Fixture::new(no_cache());
        let plans = vec![
            plan("flight_search", vec![succeeding("flights", "flight_search")]),
            plan("hotel_search", vec![succeeding("hotels", "hotel_search")]),
        ];
        let results = fx
            .dispatcher()
            .dispatch(&plans, &ProviderContext::new("", "trip"), deadline(1000))
            .await;
        assert_eq!(results.len(), 2);
        assert!(results["flight_search"].success);
        assert_eq!(results["hotel_search"].provider_name, "hotels");
        assert_eq!(results["hotel_search"].attempts, 1);
    }

    #[tokio::test]
    async fn retries_fall_back_to_next_provider() {
        let fx = Fixture::new(no_cache());
        let failing = Arc::new(FailingProvider::new("primary", "flight_search"));
        let plans = vec![plan(
            "flight_search",
            vec![failing.clone(), succeeding("backup", "flight_search")],
        )];
        let results = fx
            .dispatcher()
            .dispatch(&plans, &ProviderContext::new("", "fly"), deadline(1000))
            .await;
        let result = &results["flight_search"];
        assert!(result.success);
        assert_eq!(result.provider_name, "backup");
        assert_eq!(result.attempts, 2);
        assert_eq!(failing.calls(), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let fx = Fixture::new(DispatchPolicy {
            max_retries: 2,
            ..no_cache()
        });
        let failing = Arc::new(FailingProvider::new("flaky", "pricing"));
        let plans = vec![plan("pricing", vec![failing.clone()])];
        let results = fx
            .dispatcher()
            .dispatch(&plans, &ProviderContext::new("", "price"), deadline(1000))
            .await;
        let result = &results["pricing"];
        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::Error));
        assert_eq!(result.attempts, 3);
        assert_eq!(failing.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_not_retried() {
        let fx = Fixture::new(DispatchPolicy {
            max_retries: 3,
            ..no_cache()
        });
        let slow = Arc::new(
            SleepingProvider::new("slow", "weather", Duration::from_secs(5))
                .with_timeout_hint(Duration::from_millis(100)),
        );
        let plans = vec![plan("weather", vec![slow.clone()])];
        let results = fx
            .dispatcher()
            .dispatch(&plans, &ProviderContext::new("", "rain?"), deadline(10_000))
            .await;
        let result = &results["weather"];
        assert!(result.is_timeout());
        assert_eq!(result.error.as_deref(), Some("timeout"));
        assert_eq!(slow.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_marks_stragglers_as_timed_out() {
        let fx = Fixture::new(no_cache());
        let plans = vec![
            plan("flight_search", vec![succeeding("fast", "flight_search")]),
            plan(
                "hotel_search",
                vec![Arc::new(SleepingProvider::new("slow", "hotel_search", Duration::from_secs(5)))],
            ),
        ];
        let base = ProviderContext::new("", "trip");
        let results = fx.dispatcher().dispatch(&plans, &base, deadline(50)).await;
        assert!(results["flight_search"].success);
        assert!(results["hotel_search"].is_timeout());
        assert!(!results["hotel_search"].success);
    }

    #[tokio::test]
    async fn panics_are_recorded_not_propagated() {
        let fx = Fixture::new(DispatchPolicy {
            max_retries: 0,
            ..no_cache()
        });
        let plans = vec![
            plan("flight_search", vec![Arc::new(PanickingProvider::new("boom", "flight_search"))]),
            plan("hotel_search", vec![succeeding("hotels", "hotel_search")]),
        ];
        let results = fx
            .dispatcher()
            .dispatch(&plans, &ProviderContext::new("", "trip"), deadline(1000))
            .await;
        assert_eq!(results["flight_search"].failure, Some(FailureKind::Panic));
        assert!(results["hotel_search"].success);
    }

    #[tokio::test]
    async fn successful_results_are_cached() {
        let fx = Fixture::new(DispatchPolicy::default());
        let provider = Arc::new(CountingProvider::new("flights", "flight_search"));
        let plans = vec![plan("flight_search", vec![provider.clone()])];
        let base = ProviderContext::new("", "fly to Dubai");

        let first = fx.dispatcher().dispatch(&plans, &base, deadline(1000)).await;
        assert!(!first["flight_search"].cached);

        let second = fx.dispatcher().dispatch(&plans, &base, deadline(1000)).await;
        let cached = &second["flight_search"];
        assert!(cached.cached);
        assert_eq!(cached.attempts, 0);
        assert_eq!(cached.provider_name, "flights");
        assert_eq!(cached.payload, first["flight_search"].payload);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn stubs_and_failures_are_not_cached() {
        let fx = Fixture::new(DispatchPolicy {
            max_retries: 0,
            ..DispatchPolicy::default()
        });
        let stub: Arc<dyn CapabilityProvider> = Arc::new(tripweave_providers::NullProvider::new("pricing"));
        let failing = Arc::new(FailingProvider::new("broken", "weather"));
        let plans = vec![plan("pricing", vec![stub]), plan("weather", vec![failing.clone()])];
        let base = ProviderContext::new("", "anything");

        let results = fx.dispatcher().dispatch(&plans, &base, deadline(1000)).await;
        assert!(results["pricing"].stub);
        fx.dispatcher().dispatch(&plans, &base, deadline(1000)).await;
        assert_eq!(failing.calls(), 2);
        assert!(fx.cache.health_check().await.local_entries == 0);
    }

    #[tokio::test]
    async fn dispatch_events_are_published() {
        let fx = Fixture::new(no_cache());
        let mut rx = fx.events.subscribe();
        let plans = vec![plan("weather", vec![succeeding("wx", "weather")])];
        fx.dispatcher()
            .dispatch(&plans, &ProviderContext::new("", "weather"), deadline(1000))
            .await;
        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::CapabilityDispatched { capability, success, .. } => {
                assert_eq!(capability, "weather");
                assert!(success);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn backoff_doubles() {
        let policy = DispatchPolicy {
            retry_backoff: Duration::from_millis(10),
            ..DispatchPolicy::default()
        };
        let fx = Fixture::new(policy);
        let d = fx.dispatcher();
        assert_eq!(d.backoff(0), Duration::from_millis(10));
        assert_eq!(d.backoff(1), Duration::from_millis(20));
        assert_eq!(d.backoff(3), Duration::from_millis(80));
    }
}
