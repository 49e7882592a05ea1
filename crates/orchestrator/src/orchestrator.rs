//! The request orchestrator.
//!
//! One call moves through `received → validated → intent_resolved →
//! dispatching → aggregating → completed`, or drops to `failed` from any
//! stage. Whatever happens, the caller gets an [`OrchestrationResult`].

use crate::dispatch::{CapabilityPlan, DispatchPolicy, Dispatcher};
use crate::intent::{Intent, IntentRouter, KeywordIntentRouter};
use crate::validation::{RequestValidator, ValidatedRequest};
use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tripweave_cache::HybridCache;
use tripweave_config::{AppConfig, OrchestratorConfig, ValidationConfig};
use tripweave_core::conversation::Turn;
use tripweave_core::error::{Error, Result};
use tripweave_core::event::{DomainEvent, EventBus};
use tripweave_core::provider::{CapabilityProvider, ProviderContext, ProviderResult};
use tripweave_core::request::{CallContext, RequestEnvelope};
use tripweave_core::skill::{SharedState, SkillResult};
use tripweave_providers::{NullProvider, ProviderRegistry};
use tripweave_session::ConversationStore;
use tripweave_skills::{SkillExecutor, panic_message};

/// Intent name recorded when the caller named capabilities explicitly.
pub const EXPLICIT_INTENT: &str = "explicit";

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Validated,
    IntentResolved,
    Dispatching,
    Aggregating,
    Completed,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub request_id: String,

    pub response_time_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    /// The conversation's count once this turn is applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction_count: Option<u64>,

    pub stage: Stage,
}

/// The uniform response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub success: bool,

    /// One result per dispatched capability
    pub data: BTreeMap<String, ProviderResult>,

    pub metadata: ResultMetadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-request bookkeeping threaded through the stages.
struct Progress {
    request_id: String,
    started: Instant,
    stage: Stage,
    conversation_id: Option<String>,
    intent: Option<String>,
}

impl Progress {
    fn advance(&mut self, next: Stage) {
        debug!(request_id = %self.request_id, from = ?self.stage, to = ?next, "Stage transition");
        self.stage = next;
    }

    fn finish(
        self,
        success: bool,
        data: BTreeMap<String, ProviderResult>,
        interaction_count: Option<u64>,
        error: Option<String>,
    ) -> OrchestrationResult {
        OrchestrationResult {
            success,
            data,
            metadata: ResultMetadata {
                request_id: self.request_id,
                response_time_ms: self.started.elapsed().as_millis() as u64,
                conversation_id: self.conversation_id,
                intent: self.intent,
                interaction_count,
                stage: self.stage,
            },
            error,
        }
    }

    fn fail(mut self, error: impl Into<String>) -> OrchestrationResult {
        let error = error.into();
        warn!(request_id = %self.request_id, from = ?self.stage, error = %error, "Request failed");
        self.stage = Stage::Failed;
        self.finish(false, BTreeMap::new(), None, Some(error))
    }
}

/// Validates, routes, fans out, aggregates, and records conversation turns.
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    executor: SkillExecutor,
    cache: HybridCache,
    conversations: ConversationStore,
    router: Arc<dyn IntentRouter>,
    validator: RequestValidator,
    config: OrchestratorConfig,
    policy: DispatchPolicy,
    event_bus: Arc<EventBus>,
}

impl Orchestrator {
    /// Create an orchestrator over `registry` with default settings, a
    /// local-only cache, and an unbounded conversation store.
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        let config = OrchestratorConfig::default();
        Self {
            registry,
            executor: SkillExecutor::default(),
            cache: HybridCache::local_only(),
            conversations: ConversationStore::new(),
            router: Arc::new(KeywordIntentRouter::default()),
            validator: RequestValidator::default(),
            policy: DispatchPolicy::from(&config),
            config,
            event_bus: Arc::new(EventBus::default()),
        }
    }

    /// Create an orchestrator from a loaded configuration.
    pub fn from_config(config: &AppConfig, registry: Arc<ProviderRegistry>, cache: HybridCache) -> Self {
        Self::new(registry)
            .with_config(config.orchestrator.clone())
            .with_validation(config.validation.clone())
            .with_cache(cache)
            .with_conversations(ConversationStore::from_config(&config.conversation))
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.policy = DispatchPolicy::from(&config);
        self.config = config;
        self
    }

    pub fn with_validation(mut self, config: ValidationConfig) -> Self {
        self.validator = RequestValidator::new(config);
        self
    }

    pub fn with_cache(mut self, cache: HybridCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_conversations(mut self, store: ConversationStore) -> Self {
        self.conversations = store;
        self
    }

    pub fn with_router(mut self, router: Arc<dyn IntentRouter>) -> Self {
        self.router = router;
        self
    }

    pub fn with_skills(mut self, executor: SkillExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = bus;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &HybridCache {
        &self.cache
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Handle one request. Never returns an error and never panics.
    pub async fn orchestrate(&self, request: RequestEnvelope, call: CallContext) -> OrchestrationResult {
        let request_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let backstop = self.config.timeout() + self.config.grace();

        let run = AssertUnwindSafe(self.run(request_id.clone(), started, request, call)).catch_unwind();
        let result = match tokio::time::timeout(backstop, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => {
                let message = panic_message(payload);
                error!(request_id = %request_id, panic = %message, "Orchestrator panicked");
                Self::aborted(request_id, started, Error::Internal(format!("orchestrator panicked: {message}")))
            }
            Err(_) => {
                error!(
                    request_id = %request_id,
                    budget_ms = backstop.as_millis() as u64,
                    "Request exceeded its time budget"
                );
                Self::aborted(
                    request_id,
                    started,
                    Error::Internal("request exceeded its time budget".into()),
                )
            }
        };

        info!(
            request_id = %result.metadata.request_id,
            success = result.success,
            stage = ?result.metadata.stage,
            capabilities = result.data.len(),
            response_time_ms = result.metadata.response_time_ms,
            "Request completed"
        );
        self.event_bus.publish(DomainEvent::RequestCompleted {
            request_id: result.metadata.request_id.clone(),
            success: result.success,
            response_time_ms: result.metadata.response_time_ms,
            timestamp: Utc::now(),
        });
        result
    }

    fn aborted(request_id: String, started: Instant, error: Error) -> OrchestrationResult {
        Progress {
            request_id,
            started,
            stage: Stage::Failed,
            conversation_id: None,
            intent: None,
        }
        .fail(error.to_string())
    }

    fn validate(&self, request: &RequestEnvelope, call: &CallContext) -> Result<ValidatedRequest> {
        Ok(self.validator.validate(request, call)?)
    }

    async fn run(
        &self,
        request_id: String,
        started: Instant,
        request: RequestEnvelope,
        call: CallContext,
    ) -> OrchestrationResult {
        let deadline = started + self.config.timeout();
        let mut progress = Progress {
            request_id,
            started,
            stage: Stage::Received,
            conversation_id: None,
            intent: None,
        };

        // received → validated
        let validated = match self.validate(&request, &call) {
            Ok(v) => v,
            Err(e) => return progress.fail(e.to_string()),
        };
        progress.advance(Stage::Validated);

        let conversation_id = validated
            .conversation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        progress.conversation_id = Some(conversation_id.clone());

        self.event_bus.publish(DomainEvent::RequestReceived {
            request_id: progress.request_id.clone(),
            conversation_id: conversation_id.clone(),
            user_id: validated.user_id.clone(),
            timestamp: Utc::now(),
        });

        // validated → intent_resolved
        let intent = self.resolve_intent(&validated);
        progress.intent = Some(intent.name.clone());
        progress.advance(Stage::IntentResolved);
        info!(
            request_id = %progress.request_id,
            conversation_id = %conversation_id,
            intent = %intent.name,
            capabilities = ?intent.capabilities,
            "Intent resolved"
        );

        let plans = self.plan(&intent.capabilities);
        if plans.is_empty() {
            return progress.fail("no capabilities could be resolved");
        }

        // Only requests that will dispatch touch the conversation
        let state = self
            .conversations
            .get_or_create(&conversation_id, &validated.user_id);
        let ticket = self.conversations.reserve(&conversation_id);

        // intent_resolved → dispatching
        progress.advance(Stage::Dispatching);
        let base = ProviderContext {
            request_id: progress.request_id.clone(),
            capability: String::new(),
            message: validated.message.clone(),
            user_id: validated.user_id.clone(),
            tier: validated.tier,
            conversation_id: conversation_id.clone(),
            params: validated.params.clone(),
            shared_state: state.derived_context.clone(),
            attempt: 1,
            cancellation: CancellationToken::new(),
        };
        let dispatcher = Dispatcher::new(&self.executor, &self.cache, &self.policy, &self.event_bus);
        let data = dispatcher.dispatch(&plans, &base, deadline).await;

        // dispatching → aggregating
        progress.advance(Stage::Aggregating);
        let require_all = validated.require_all || self.config.require_all;
        let succeeded = data.values().filter(|r| r.success).count();
        let success = if require_all {
            succeeded == data.len()
        } else {
            succeeded > 0
        };
        let error = match (success, require_all) {
            (true, _) => None,
            (false, true) => Some(format!(
                "{} of {} capabilities failed",
                data.len() - succeeded,
                data.len()
            )),
            (false, false) => Some("all capabilities failed".to_string()),
        };

        // aggregating → completed
        let turn = Turn::new(validated.message.clone()).with_intent(intent.name.clone());
        let interaction_count = match ticket {
            Some(ticket) => ticket.commit(turn).map(|r| r.interaction_count),
            None => self
                .conversations
                .append(&conversation_id, turn)
                .map(|r| r.interaction_count),
        };
        progress.advance(Stage::Completed);
        progress.finish(success, data, interaction_count, error)
    }

    fn resolve_intent(&self, validated: &ValidatedRequest) -> Intent {
        if validated.capabilities.is_empty() {
            self.router.detect_intent(&validated.message)
        } else {
            Intent::new(EXPLICIT_INTENT, validated.capabilities.iter().cloned())
        }
    }

    /// Providers for each distinct capability.
    ///
    /// Unregistered capabilities get a stub when `stub_fallback` is on and
    /// are dropped otherwise, as are registered stubs.
    fn plan(&self, capabilities: &[String]) -> Vec<CapabilityPlan> {
        let mut plans: Vec<CapabilityPlan> = Vec::new();
        for capability in capabilities {
            if plans.iter().any(|p| &p.capability == capability) {
                continue;
            }
            let mut providers = self.registry.candidates(capability);
            if !self.config.stub_fallback {
                providers.retain(|p| !p.is_stub());
            }
            if providers.is_empty() {
                if !self.config.stub_fallback {
                    warn!(capability = %capability, "No provider for capability; skipped");
                    continue;
                }
                providers.push(Arc::new(NullProvider::new(capability.clone())) as Arc<dyn CapabilityProvider>);
            }
            plans.push(CapabilityPlan {
                capability: capability.clone(),
                providers,
            });
        }
        plans
    }

    /// Run a registered skill against a conversation's shared state.
    ///
    /// Keys the skill writes are merged into the conversation's derived
    /// context through a committed turn.
    pub async fn run_skill(&self, skill: &str, params: serde_json::Value, call: &CallContext) -> SkillResult {
        let Some(conversation_id) = call.conversation_id.as_deref().filter(|id| !id.trim().is_empty()) else {
            return self.executor.execute(skill, params, SharedState::new()).await;
        };

        let user_id = if call.user_id.trim().is_empty() {
            self.validator.guest_user_id().to_string()
        } else {
            call.user_id.trim().to_string()
        };
        let state = self.conversations.get_or_create(conversation_id, &user_id);
        let ticket = self.conversations.reserve(conversation_id);
        let shared = SharedState::from_map(state.derived_context);

        let result = self.executor.execute(skill, params, shared.clone()).await;
        let changes = shared.changes().await;
        if let Some(ticket) = ticket
            && !changes.is_empty()
        {
            debug!(skill, conversation_id, keys = changes.len(), "Merging skill state");
            ticket.commit(Turn::new(format!("[skill] {skill}")).with_context_updates(changes));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use std::time::Duration;
    use tripweave_core::error::SkillError;
    use tripweave_core::skill::{SkillMetadata, SkillRegistry};

    fn registry(providers: Vec<Arc<dyn CapabilityProvider>>) -> Arc<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        registry.register_all(providers);
        Arc::new(registry)
    }

    fn travel_registry() -> Arc<ProviderRegistry> {
        registry(vec![
            succeeding("flights", "flight_search"),
            succeeding("hotels", "hotel_search"),
        ])
    }

    #[tokio::test]
    async fn empty_message_fails_without_dispatch() {
        let flights = Arc::new(CountingProvider::new("flights", "flight_search"));
        let orch = Orchestrator::new(registry(vec![flights.clone() as Arc<dyn CapabilityProvider>]));
        let result = orch
            .orchestrate(RequestEnvelope::new("").with_user("u1"), CallContext::default())
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Validation error: message is empty"));
        assert_eq!(result.metadata.stage, Stage::Failed);
        assert!(result.data.is_empty());
        assert_eq!(flights.calls(), 0);
        assert!(orch.conversations().is_empty());
    }

    #[tokio::test]
    async fn plan_trip_fans_out_to_flights_and_hotels() {
        let orch = Orchestrator::new(travel_registry());
        let result = orch
            .orchestrate(
                RequestEnvelope::new("plan a trip to Dubai for 2 people, budget 5000"),
                CallContext::new("u1"),
            )
            .await;
        assert!(result.success);
        assert_eq!(result.metadata.intent.as_deref(), Some("plan_trip"));
        assert_eq!(result.metadata.stage, Stage::Completed);
        assert_eq!(result.metadata.interaction_count, Some(1));
        assert!(result.data["flight_search"].success);
        assert!(result.data["hotel_search"].success);
    }

    #[tokio::test]
    async fn unknown_capability_yields_stub() {
        let orch = Orchestrator::new(travel_registry());
        let result = orch
            .orchestrate(
                RequestEnvelope::new("show me prices").with_capabilities(["pricing"]),
                CallContext::default(),
            )
            .await;
        assert!(result.success);
        assert_eq!(result.metadata.intent.as_deref(), Some(EXPLICIT_INTENT));
        let pricing = &result.data["pricing"];
        assert!(pricing.stub);
        assert_eq!(pricing.payload["stub"], true);
        assert_eq!(pricing.provider_name, "null");
    }

    #[tokio::test]
    async fn no_resolvable_capability_without_stub_fallback() {
        let orch = Orchestrator::new(travel_registry()).with_config(OrchestratorConfig {
            stub_fallback: false,
            ..OrchestratorConfig::default()
        });
        let result = orch
            .orchestrate(
                RequestEnvelope::new("how much is it").with_capabilities(["pricing"]),
                CallContext::new("u1").with_conversation("pricing-chat"),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no capabilities could be resolved"));
        assert_eq!(result.metadata.stage, Stage::Failed);
        assert!(orch.conversations().get_by_id("pricing-chat").is_none());
        assert!(orch.conversations().is_empty());
    }

    struct BrokenRouter;

    impl IntentRouter for BrokenRouter {
        fn detect_intent(&self, _message: &str) -> Intent {
            panic!("classifier offline")
        }
    }

    #[tokio::test]
    async fn internal_panic_becomes_failed_envelope() {
        let orch = Orchestrator::new(travel_registry()).with_router(Arc::new(BrokenRouter));
        let result = orch
            .orchestrate(RequestEnvelope::new("plan a trip"), CallContext::default())
            .await;
        assert!(!result.success);
        assert_eq!(result.metadata.stage, Stage::Failed);
        assert_eq!(
            result.error.as_deref(),
            Some("Internal error: orchestrator panicked: classifier offline")
        );
    }

    #[tokio::test]
    async fn partial_success_is_success() {
        let orch = Orchestrator::new(registry(vec![
            Arc::new(PanickingProvider::new("boom", "flight_search")),
            succeeding("hotels", "hotel_search"),
        ]));
        let result = orch
            .orchestrate(RequestEnvelope::new("plan my holiday"), CallContext::default())
            .await;
        assert!(result.success);
        assert!(!result.data["flight_search"].success);
        assert!(result.data["hotel_search"].success);
    }

    #[tokio::test]
    async fn require_all_turns_partial_into_failure() {
        let orch = Orchestrator::new(registry(vec![
            Arc::new(FailingProvider::new("broken", "flight_search")),
            succeeding("hotels", "hotel_search"),
        ]));
        let result = orch
            .orchestrate(
                RequestEnvelope::new("plan my holiday").requiring_all(),
                CallContext::default(),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("1 of 2 capabilities failed"));
        assert_eq!(result.metadata.stage, Stage::Completed);
    }

    #[tokio::test]
    async fn all_failing_is_failure() {
        let orch = Orchestrator::new(registry(vec![
            Arc::new(FailingProvider::new("f", "flight_search")),
            Arc::new(FailingProvider::new("h", "hotel_search")),
        ]));
        let result = orch
            .orchestrate(RequestEnvelope::new("plan my holiday"), CallContext::default())
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("all capabilities failed"));
    }

    #[tokio::test]
    async fn conversation_accumulates_turns() {
        let orch = Orchestrator::new(travel_registry());
        let call = CallContext::new("u1").with_conversation("conv-1");

        let first = orch
            .orchestrate(RequestEnvelope::new("hello there"), call.clone())
            .await;
        let second = orch
            .orchestrate(RequestEnvelope::new("plan a trip to Rome"), call.clone())
            .await;

        assert_eq!(first.metadata.interaction_count, Some(1));
        assert_eq!(second.metadata.interaction_count, Some(2));
        assert_eq!(second.metadata.conversation_id.as_deref(), Some("conv-1"));

        let state = orch.conversations().get_by_id("conv-1").unwrap();
        let messages: Vec<_> = state.turn_history.iter().map(|t| t.message.as_str()).collect();
        assert_eq!(messages, ["hello there", "plan a trip to Rome"]);
        assert_eq!(state.derived_context["last_intent"], "plan_trip");
    }

    #[tokio::test]
    async fn shared_state_reaches_providers() {
        let orch = Orchestrator::new(Arc::new(tripweave_providers::default_registry()));
        let call = CallContext::new("u1").with_conversation("c");
        for _ in 0..2 {
            orch.orchestrate(RequestEnvelope::new("thanks a lot"), call.clone()).await;
        }
        let result = orch.orchestrate(RequestEnvelope::new("hello"), call).await;
        let text = result.data["simple_response"].payload["text"].as_str().unwrap();
        assert!(text.starts_with("Welcome back"));
    }

    #[tokio::test(start_paused = true)]
    async fn global_timeout_marks_slow_capability() {
        let orch = Orchestrator::new(registry(vec![
            Arc::new(SleepingProvider::new("slow", "flight_search", Duration::from_millis(500))),
            succeeding("hotels", "hotel_search"),
        ]))
        .with_config(OrchestratorConfig {
            timeout_ms: 20,
            ..OrchestratorConfig::default()
        });

        let result = orch
            .orchestrate(RequestEnvelope::new("plan a getaway"), CallContext::default())
            .await;
        assert!(result.success);
        assert!(result.data["flight_search"].is_timeout());
        assert_eq!(result.data["flight_search"].error.as_deref(), Some("timeout"));
        assert!(result.metadata.response_time_ms < 100);
    }

    #[tokio::test]
    async fn events_bracket_the_request() {
        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let orch = Orchestrator::new(travel_registry()).with_event_bus(bus);
        orch.orchestrate(RequestEnvelope::new("find a hotel"), CallContext::default())
            .await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event.as_ref() {
                DomainEvent::RequestReceived { .. } => "received",
                DomainEvent::CapabilityDispatched { .. } => "dispatched",
                DomainEvent::RequestCompleted { .. } => "completed",
                _ => "other",
            });
        }
        assert_eq!(kinds, ["received", "dispatched", "completed"]);
    }

    #[tokio::test]
    async fn run_skill_merges_written_keys() {
        let mut skills = SkillRegistry::new();
        skills.register(
            "set_airline",
            |params: serde_json::Value, state: SharedState| async move {
                state.set("preferred_airline", params["airline"].clone()).await;
                Ok::<_, SkillError>(serde_json::json!({"ok": true}))
            },
            SkillMetadata::new("Remember the preferred airline"),
        );
        let orch = Orchestrator::new(travel_registry()).with_skills(SkillExecutor::new(skills));
        let call = CallContext::new("u1").with_conversation("c1");

        let result = orch
            .run_skill("set_airline", serde_json::json!({"airline": "EK"}), &call)
            .await;
        assert!(result.success);
        let state = orch.conversations().get_by_id("c1").unwrap();
        assert_eq!(state.derived_context["preferred_airline"], "EK");

        let missing = orch.run_skill("nope", serde_json::json!({}), &call).await;
        assert!(!missing.success);
        assert_eq!(missing.available, vec!["set_airline"]);
    }
}
