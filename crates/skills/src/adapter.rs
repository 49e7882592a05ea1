//! Exposes a registered skill as a capability provider.

use async_trait::async_trait;
use tripweave_core::error::{ProviderError, SkillError};
use tripweave_core::provider::{CapabilityProvider, ProviderContext, ProviderOutput};
use tripweave_core::skill::{RegisteredSkill, SharedState, SkillRegistry};

/// A [`CapabilityProvider`] that runs a skill handler.
///
/// The skill receives the request's structured parameters (plus `message`)
/// and a shared state seeded from the conversation context.
pub struct SkillProvider {
    skill: RegisteredSkill,
}

impl SkillProvider {
    pub fn new(skill: RegisteredSkill) -> Self {
        Self { skill }
    }

    /// One provider per skill that declares capabilities.
    pub fn from_registry(registry: &SkillRegistry) -> Vec<Self> {
        registry
            .names()
            .iter()
            .filter_map(|name| registry.get(name))
            .filter(|skill| !skill.metadata.capabilities.is_empty())
            .cloned()
            .map(Self::new)
            .collect()
    }
}

#[async_trait]
impl CapabilityProvider for SkillProvider {
    fn name(&self) -> &str {
        &self.skill.name
    }

    fn capabilities(&self) -> Vec<String> {
        self.skill.metadata.capabilities.clone()
    }

    fn priority(&self) -> i32 {
        self.skill.metadata.priority
    }

    async fn execute(&self, ctx: ProviderContext) -> Result<ProviderOutput, ProviderError> {
        let mut params = ctx.params.clone();
        params
            .entry("message")
            .or_insert_with(|| serde_json::Value::from(ctx.message.clone()));
        let state = SharedState::from_map(ctx.shared_state.clone());

        self.skill
            .handler
            .call(serde_json::Value::Object(params), state)
            .await
            .map(ProviderOutput::new)
            .map_err(|e| match e {
                SkillError::InvalidParams(reason) => ProviderError::InvalidInput(reason),
                other => ProviderError::failed(&self.skill.name, other.to_string()),
            })
    }
}
