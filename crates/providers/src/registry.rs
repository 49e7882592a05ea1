//! Provider registry: maps capability names to capability providers.
//!
//! Built once at startup and then shared read-only behind an `Arc`.
//! Resolution picks the highest-priority provider for a capability and
//! degrades to a [`NullProvider`] when nothing is registered.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use tripweave_core::error::RegistrationError;
use tripweave_core::provider::CapabilityProvider;
use crate::null::NullProvider;

/// Routes capability names to providers.
#[derive(Default)]
pub struct ProviderRegistry {
    by_capability: HashMap<String, Vec<Entry>>,
    next_seq: usize,
}

struct Entry {
    provider: Arc<dyn CapabilityProvider>,
    seq: usize,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for one capability.
    ///
    /// Malformed providers are rejected with a warning; the registry stays
    /// usable. Re-registering the same provider name for a capability
    /// replaces the earlier registration.
    pub fn register(
        &mut self,
        capability: impl Into<String>,
        provider: Arc<dyn CapabilityProvider>,
    ) -> Result<(), RegistrationError> {
        let capability = capability.into();
        if let Err(e) = Self::check(&capability, provider.as_ref()) {
            warn!(capability = %capability, error = %e, "Rejected provider registration");
            return Err(e);
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let entries = self.by_capability.entry(capability.clone()).or_default();
        entries.retain(|e| e.provider.name() != provider.name());
        entries.push(Entry { provider, seq });
        entries.sort_by(|a, b| {
            b.provider
                .priority()
                .cmp(&a.provider.priority())
                .then(a.seq.cmp(&b.seq))
        });

        debug!(capability = %capability, providers = entries.len(), "Provider registered");
        Ok(())
    }

    /// Register a provider under every capability it declares.
    ///
    /// Returns the number of capabilities it was registered for.
    pub fn register_provider(
        &mut self,
        provider: Arc<dyn CapabilityProvider>,
    ) -> Result<usize, RegistrationError> {
        let capabilities = provider.capabilities();
        if provider.name().trim().is_empty() {
            warn!("Rejected provider with empty name");
            return Err(RegistrationError::EmptyName);
        }
        if capabilities.is_empty() {
            let err = RegistrationError::NoCapabilities(provider.name().to_string());
            warn!(error = %err, "Rejected provider registration");
            return Err(err);
        }

        let mut registered = 0;
        for capability in capabilities {
            if self.register(capability, provider.clone()).is_ok() {
                registered += 1;
            }
        }
        Ok(registered)
    }

    /// Register a batch of providers; failures are logged and skipped.
    ///
    /// Returns how many providers were accepted.
    pub fn register_all<I>(&mut self, providers: I) -> usize
    where
        I: IntoIterator<Item = Arc<dyn CapabilityProvider>>,
    {
        providers
            .into_iter()
            .filter(|p| matches!(self.register_provider(p.clone()), Ok(n) if n > 0))
            .count()
    }

    /// The highest-priority provider for a capability, or a stub.
    pub fn resolve(&self, capability: &str) -> Arc<dyn CapabilityProvider> {
        self.try_resolve(capability).unwrap_or_else(|| {
            debug!(capability = %capability, "No provider registered, using stub");
            Arc::new(NullProvider::new(capability))
        })
    }

    /// The highest-priority provider for a capability, if any is registered.
    pub fn try_resolve(&self, capability: &str) -> Option<Arc<dyn CapabilityProvider>> {
        self.by_capability
            .get(capability)
            .and_then(|entries| entries.first())
            .map(|e| e.provider.clone())
    }

    /// Every provider for a capability, highest priority first.
    pub fn candidates(&self, capability: &str) -> Vec<Arc<dyn CapabilityProvider>> {
        self.by_capability
            .get(capability)
            .map(|entries| entries.iter().map(|e| e.provider.clone()).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, capability: &str) -> bool {
        self.by_capability.contains_key(capability)
    }

    /// Registered capability names, sorted.
    pub fn capabilities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_capability.keys().cloned().collect();
        names.sort();
        names
    }

    /// Distinct registered provider names, sorted.
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .by_capability
            .values()
            .flatten()
            .map(|e| e.provider.name().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.by_capability.is_empty()
    }

    fn check(capability: &str, provider: &dyn CapabilityProvider) -> Result<(), RegistrationError> {
        if capability.trim().is_empty() {
            return Err(RegistrationError::EmptyCapability);
        }
        if provider.name().trim().is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        let declared = provider.capabilities();
        if declared.is_empty() {
            return Err(RegistrationError::NoCapabilities(provider.name().to_string()));
        }
        if !declared.iter().any(|c| c == capability) {
            return Err(RegistrationError::UndeclaredCapability {
                provider: provider.name().to_string(),
                capability: capability.to_string(),
            });
        }
        Ok(())
    }
}
