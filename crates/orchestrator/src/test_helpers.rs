//! Shared mock providers for orchestrator tests.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tripweave_core::error::ProviderError;
use tripweave_core::provider::{CapabilityProvider, ProviderContext, ProviderOutput};

fn echo_payload(name: &str, ctx: &ProviderContext) -> serde_json::Value {
    serde_json::json!({
        "provider": name,
        "capability": ctx.capability,
        "message": ctx.message,
        "params": ctx.params,
    })
}

/// Succeeds every time and counts its calls.
pub struct CountingProvider {
    name: String,
    capability: String,
    calls: AtomicUsize,
}

impl CountingProvider {
    pub fn new(name: &str, capability: &str) -> Self {
        Self {
            name: name.into(),
            capability: capability.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityProvider for CountingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<String> {
        vec![self.capability.clone()]
    }

    async fn execute(&self, ctx: ProviderContext) -> Result<ProviderOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderOutput::new(echo_payload(&self.name, &ctx)))
    }
}

/// A succeeding provider, ready to register.
pub fn succeeding(name: &str, capability: &str) -> Arc<dyn CapabilityProvider> {
    Arc::new(CountingProvider::new(name, capability))
}

/// Fails every time with an execution error.
pub struct FailingProvider {
    name: String,
    capability: String,
    calls: AtomicUsize,
}

impl FailingProvider {
    pub fn new(name: &str, capability: &str) -> Self {
        Self {
            name: name.into(),
            capability: capability.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityProvider for FailingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<String> {
        vec![self.capability.clone()]
    }

    async fn execute(&self, _ctx: ProviderContext) -> Result<ProviderOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::failed(&self.name, "upstream returned 503"))
    }
}

/// Sleeps before succeeding.
pub struct SleepingProvider {
    name: String,
    capability: String,
    delay: Duration,
    hint: Option<Duration>,
    calls: AtomicUsize,
}

impl SleepingProvider {
    pub fn new(name: &str, capability: &str, delay: Duration) -> Self {
        Self {
            name: name.into(),
            capability: capability.into(),
            delay,
            hint: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_timeout_hint(mut self, hint: Duration) -> Self {
        self.hint = Some(hint);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityProvider for SleepingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<String> {
        vec![self.capability.clone()]
    }

    fn timeout_hint(&self) -> Option<Duration> {
        self.hint
    }

    async fn execute(&self, ctx: ProviderContext) -> Result<ProviderOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(ProviderOutput::new(echo_payload(&self.name, &ctx)))
    }
}

/// Panics inside `execute`.
pub struct PanickingProvider {
    name: String,
    capability: String,
}

impl PanickingProvider {
    pub fn new(name: &str, capability: &str) -> Self {
        Self {
            name: name.into(),
            capability: capability.into(),
        }
    }
}

#[async_trait]
impl CapabilityProvider for PanickingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<String> {
        vec![self.capability.clone()]
    }

    async fn execute(&self, _ctx: ProviderContext) -> Result<ProviderOutput, ProviderError> {
        panic!("{} exploded", self.name)
    }
}
