//! Capability provider trait: the abstraction over pluggable work units.
//!
//! A provider (flight search, hotel search, pricing, weather, ...) declares
//! which capabilities it serves, a priority used to pick between competing
//! providers, and an optional timeout hint. The orchestrator only ever talks
//! to this trait; concrete providers live outside the core.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::request::UserTier;

/// Everything a provider gets to see about the request it is serving.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    /// Request correlation ID
    pub request_id: String,

    /// The capability being served
    pub capability: String,

    /// Sanitized user message
    pub message: String,

    pub user_id: String,

    pub tier: UserTier,

    pub conversation_id: String,

    /// Structured request parameters (origin, destination, budget, ...)
    pub params: serde_json::Map<String, serde_json::Value>,

    /// Derived conversation context (emotional state, friendship level, ...)
    pub shared_state: serde_json::Map<String, serde_json::Value>,

    /// 1-based attempt number
    pub attempt: u32,

    /// Cancelled when the orchestrator abandons the request.
    pub cancellation: CancellationToken,
}

impl ProviderContext {
    /// Minimal context for a single capability, mostly useful in tests.
    pub fn new(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            capability: capability.into(),
            message: message.into(),
            user_id: String::new(),
            tier: UserTier::default(),
            conversation_id: String::new(),
            params: serde_json::Map::new(),
            shared_state: serde_json::Map::new(),
            attempt: 1,
            cancellation: CancellationToken::new(),
        }
    }

    /// Look up a structured parameter.
    pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }

    /// The context as a JSON mapping, for providers that work on plain maps.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "request_id": self.request_id,
            "capability": self.capability,
            "message": self.message,
            "user_id": self.user_id,
            "tier": self.tier,
            "conversation_id": self.conversation_id,
            "params": self.params,
            "shared_state": self.shared_state,
            "attempt": self.attempt,
        })
    }
}

/// What a provider hands back on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOutput {
    pub payload: serde_json::Value,
}

impl ProviderOutput {
    pub fn new(payload: serde_json::Value) -> Self {
        Self { payload }
    }
}

/// Why a capability invocation did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The provider returned an error
    Error,
    /// The provider exceeded its time budget
    Timeout,
    /// The provider panicked
    Panic,
    /// The request deadline expired before the provider was called
    Cancelled,
}

/// The recorded outcome of one capability invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider_name: String,

    pub success: bool,

    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,

    pub elapsed_ms: u64,

    /// Number of provider calls made (0 when served from cache)
    #[serde(default)]
    pub attempts: u32,

    /// Served from the hybrid cache
    #[serde(default)]
    pub cached: bool,

    /// Produced by a placeholder provider
    #[serde(default)]
    pub stub: bool,
}

impl ProviderResult {
    pub fn ok(provider_name: impl Into<String>, payload: serde_json::Value, elapsed_ms: u64) -> Self {
        Self {
            provider_name: provider_name.into(),
            success: true,
            payload,
            error: None,
            failure: None,
            elapsed_ms,
            attempts: 1,
            cached: false,
            stub: false,
        }
    }

    pub fn failed(
        provider_name: impl Into<String>,
        kind: FailureKind,
        error: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            success: false,
            payload: serde_json::Value::Null,
            error: Some(error.into()),
            failure: Some(kind),
            elapsed_ms,
            attempts: 1,
            cached: false,
            stub: false,
        }
    }

    /// A timed-out invocation. The error text is always `"timeout"`.
    pub fn timeout(provider_name: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::failed(provider_name, FailureKind::Timeout, "timeout", elapsed_ms)
    }

    pub fn is_timeout(&self) -> bool {
        self.failure == Some(FailureKind::Timeout)
    }
}

/// The core capability provider trait.
///
/// Implementations must be cheap to share (`Arc<dyn CapabilityProvider>`)
/// and safe to call concurrently.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Unique provider name (e.g., "skyscanner", "null").
    fn name(&self) -> &str;

    /// Capability names this provider can serve.
    fn capabilities(&self) -> Vec<String>;

    /// Higher wins when several providers serve one capability.
    fn priority(&self) -> i32 {
        0
    }

    /// Preferred upper bound for one call; the orchestrator never exceeds
    /// its own remaining budget regardless.
    fn timeout_hint(&self) -> Option<Duration> {
        None
    }

    /// Whether successful results may be served from the hybrid cache.
    fn cacheable(&self) -> bool {
        true
    }

    /// Placeholder providers return marked results instead of real data.
    fn is_stub(&self) -> bool {
        false
    }

    /// Execute the capability.
    async fn execute(&self, ctx: ProviderContext) -> std::result::Result<ProviderOutput, ProviderError>;
}
