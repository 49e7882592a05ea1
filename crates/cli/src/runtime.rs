//! Wiring shared by the commands: registry, cache, orchestrator.

use std::sync::Arc;
use tripweave_cache::build_from_config;
use tripweave_config::AppConfig;
use tripweave_core::event::EventBus;
use tripweave_core::provider::CapabilityProvider;
use tripweave_orchestrator::Orchestrator;
use tripweave_providers::{ProviderRegistry, default_registry};
use tripweave_skills::{SkillExecutor, SkillProvider, default_skills};

/// Built-in providers plus every skill that declares a capability.
pub fn build_registry() -> ProviderRegistry {
    let mut registry = default_registry();
    let skill_providers = SkillProvider::from_registry(&default_skills())
        .into_iter()
        .map(|p| Arc::new(p) as Arc<dyn CapabilityProvider>);
    let added = registry.register_all(skill_providers);
    tracing::debug!(added, capabilities = ?registry.capabilities(), "Provider registry built");
    registry
}

pub async fn build_orchestrator(config: &AppConfig) -> Orchestrator {
    let bus = Arc::new(EventBus::default());
    let cache = build_from_config(&config.cache).await.with_event_bus(bus.clone());
    Orchestrator::from_config(config, Arc::new(build_registry()), cache)
        .with_skills(SkillExecutor::new(default_skills()))
        .with_event_bus(bus)
}
