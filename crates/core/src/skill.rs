//! Skill trait: named handlers invoked with parameters and shared state.
//!
//! Skills are registered by name in a [`SkillRegistry`] together with
//! descriptive metadata. Plain async closures of the shape
//! `|params, state| async { ... }` implement [`SkillHandler`] directly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use crate::error::SkillError;

/// Conversational state shared between the orchestrator and a skill run.
///
/// Cloning is cheap; all clones see the same map.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<serde_json::Map<String, serde_json::Value>>>,
    written: Arc<RwLock<Vec<String>>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the state from an existing map (e.g., derived conversation context).
    pub fn from_map(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
            written: Arc::default(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        let key = key.into();
        self.inner.write().await.insert(key.clone(), value);
        let mut written = self.written.write().await;
        if !written.contains(&key) {
            written.push(key);
        }
    }

    pub async fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        self.inner.read().await.clone()
    }

    /// Only the keys written through [`SharedState::set`], with their current values.
    pub async fn changes(&self) -> serde_json::Map<String, serde_json::Value> {
        let inner = self.inner.read().await;
        let written = self.written.read().await;
        written
            .iter()
            .filter_map(|k| inner.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }
}

/// Descriptive metadata supplied at registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillMetadata {
    #[serde(default)]
    pub description: String,

    /// Capability names this skill can stand in for
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,

    #[serde(default)]
    pub priority: i32,
}

impl SkillMetadata {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

/// The structured result of a skill run. Never an error value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillResult {
    pub skill: String,

    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Registered skill names, filled in when the skill was not found
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available: Vec<String>,

    pub elapsed_ms: u64,
}

/// A skill handler: `(params, shared_state) -> result | error`.
#[async_trait]
pub trait SkillHandler: Send + Sync {
    async fn call(
        &self,
        params: serde_json::Value,
        state: SharedState,
    ) -> std::result::Result<serde_json::Value, SkillError>;
}

#[async_trait]
impl<F, Fut> SkillHandler for F
where
    F: Fn(serde_json::Value, SharedState) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<serde_json::Value, SkillError>> + Send,
{
    async fn call(
        &self,
        params: serde_json::Value,
        state: SharedState,
    ) -> std::result::Result<serde_json::Value, SkillError> {
        (self)(params, state).await
    }
}

/// A registered skill.
#[derive(Clone)]
pub struct RegisteredSkill {
    pub name: String,
    pub handler: Arc<dyn SkillHandler>,
    pub metadata: SkillMetadata,
}

/// Registry of skills, keyed by name.
#[derive(Default)]
pub struct SkillRegistry {
    skills: HashMap<String, RegisteredSkill>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill. Replaces any existing skill with the same name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: impl SkillHandler + 'static,
        metadata: SkillMetadata,
    ) {
        let name = name.into();
        self.skills.insert(
            name.clone(),
            RegisteredSkill {
                name,
                handler: Arc::new(handler),
                metadata,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredSkill> {
        self.skills.get(name)
    }

    /// All registered skill names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.skills.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closure_registers_as_handler() {
        let mut registry = SkillRegistry::new();
        registry.register(
            "greet",
            |params: serde_json::Value, _state: SharedState| async move {
                let name = params["name"].as_str().unwrap_or("").to_string();
                Ok::<_, SkillError>(serde_json::json!({ "greeting": format!("hi {name}") }))
            },
            SkillMetadata::new("Greets the user"),
        );

        let skill = registry.get("greet").unwrap();
        let out = skill
            .handler
            .call(serde_json::json!({"name": "Ada"}), SharedState::new())
            .await
            .unwrap();
        assert_eq!(out["greeting"], "hi Ada");
        assert_eq!(registry.names(), vec!["greet".to_string()]);
    }

    #[tokio::test]
    async fn shared_state_tracks_changes() {
        let mut seed = serde_json::Map::new();
        seed.insert("mood".into(), serde_json::json!("neutral"));
        let state = SharedState::from_map(seed);

        state.set("budget", serde_json::json!(5000)).await;
        assert_eq!(state.get("mood").await, Some(serde_json::json!("neutral")));

        let changes = state.changes().await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes["budget"], 5000);
        assert_eq!(state.snapshot().await.len(), 2);
    }
}
