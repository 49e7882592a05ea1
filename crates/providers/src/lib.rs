//! Capability provider registry and built-in providers for Tripweave.
//!
//! Concrete travel providers (flights, hotels, pricing, weather) live
//! outside this workspace and plug in through
//! [`tripweave_core::CapabilityProvider`].

pub mod builtin;
pub mod null;
pub mod registry;

pub use builtin::SimpleResponseProvider;
pub use null::NullProvider;
pub use registry::ProviderRegistry;

use std::sync::Arc;

/// Create a registry holding only the built-in providers.
pub fn default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register_all([Arc::new(SimpleResponseProvider) as Arc<dyn tripweave_core::CapabilityProvider>]);
    registry
}
