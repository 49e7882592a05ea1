//! Null provider: answers any capability with a marked placeholder.

use async_trait::async_trait;
use tripweave_core::error::ProviderError;
use tripweave_core::provider::{CapabilityProvider, ProviderContext, ProviderOutput};

/// Stands in for a capability with no registered provider.
///
/// `execute` always succeeds with `{"stub": true, "capability": ...}` so
/// callers can tell placeholder data from real answers.
pub struct NullProvider {
    capability: String,
}

impl NullProvider {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
        }
    }
}

#[async_trait]
impl CapabilityProvider for NullProvider {
    fn name(&self) -> &str {
        "null"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![self.capability.clone()]
    }

    fn priority(&self) -> i32 {
        i32::MIN
    }

    fn cacheable(&self) -> bool {
        false
    }

    fn is_stub(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: ProviderContext) -> Result<ProviderOutput, ProviderError> {
        Ok(ProviderOutput::new(serde_json::json!({
            "stub": true,
            "capability": ctx.capability,
        })))
    }
}
