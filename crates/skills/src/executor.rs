//! Skill executor: runs skills and providers behind a single failure boundary.
//!
//! Nothing that happens inside a handler escapes: returned errors and panics
//! alike come back as structured failures.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use tripweave_core::error::{ProviderError, SkillError};
use tripweave_core::provider::{CapabilityProvider, ProviderContext, ProviderOutput};
use tripweave_core::skill::{SharedState, SkillRegistry, SkillResult};

/// Render a panic payload as text.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Executes registered skills by name.
#[derive(Clone, Default)]
pub struct SkillExecutor {
    registry: Arc<SkillRegistry>,
}

impl SkillExecutor {
    pub fn new(registry: SkillRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn from_shared(registry: Arc<SkillRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    /// Run `skill` with `params` and `state`. Never fails.
    pub async fn execute(&self, skill: &str, params: serde_json::Value, state: SharedState) -> SkillResult {
        let start = Instant::now();

        let Some(registered) = self.registry.get(skill) else {
            let error = SkillError::NotFound(skill.to_string());
            warn!(skill, error = %error, "Skill not found");
            return SkillResult {
                skill: skill.to_string(),
                success: false,
                data: None,
                error: Some(error.to_string()),
                available: self.registry.names(),
                elapsed_ms: start.elapsed().as_millis() as u64,
            };
        };

        let outcome = AssertUnwindSafe(registered.handler.call(params, state))
            .catch_unwind()
            .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let (data, error) = match outcome {
            Ok(Ok(value)) => (Some(value), None),
            Ok(Err(e)) => {
                warn!(skill, error = %e, "Skill returned an error");
                (None, Some(e.to_string()))
            }
            Err(payload) => {
                let message = panic_message(payload);
                warn!(skill, panic = %message, "Skill panicked");
                (None, Some(format!("skill '{skill}' panicked: {message}")))
            }
        };

        debug!(skill, success = error.is_none(), elapsed_ms, "Skill finished");
        SkillResult {
            skill: skill.to_string(),
            success: error.is_none(),
            data,
            error,
            available: Vec::new(),
            elapsed_ms,
        }
    }

    /// Invoke a capability provider inside the failure boundary.
    ///
    /// A panic surfaces as [`ProviderError::Panicked`].
    pub async fn invoke_provider(
        &self,
        provider: &dyn CapabilityProvider,
        ctx: ProviderContext,
    ) -> Result<ProviderOutput, ProviderError> {
        match AssertUnwindSafe(provider.execute(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload);
                warn!(provider = provider.name(), panic = %message, "Provider panicked");
                Err(ProviderError::Panicked {
                    provider: provider.name().to_string(),
                    message,
                })
            }
        }
    }
}
