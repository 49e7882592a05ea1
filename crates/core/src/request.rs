//! Inbound request types.
//!
//! A front end (HTTP route, bot adapter, CLI) builds a [`RequestEnvelope`]
//! and a [`CallContext`] and hands both to the orchestrator.

use serde::{Deserialize, Serialize};

/// Account tier of the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    #[default]
    Guest,
    Standard,
    Premium,
}

impl std::fmt::Display for UserTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UserTier::Guest => "guest",
            UserTier::Standard => "standard",
            UserTier::Premium => "premium",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for UserTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "guest" => Ok(UserTier::Guest),
            "standard" => Ok(UserTier::Standard),
            "premium" => Ok(UserTier::Premium),
            other => Err(format!("unknown tier '{other}'")),
        }
    }
}

/// One inbound user utterance plus its structured parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// The raw user message
    #[serde(alias = "message", alias = "query")]
    pub raw_message: String,

    /// Caller identity (defaults to the guest sentinel during validation)
    #[serde(default)]
    pub user_id: String,

    /// Conversation to continue; a new one is created when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Origin, destination, dates, travelers, budget, ...
    #[serde(default)]
    pub structured_params: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub tier: UserTier,

    /// Explicit capabilities to invoke; bypasses intent detection when non-empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,

    /// Require every dispatched capability to succeed
    #[serde(default)]
    pub require_all: bool,
}

impl RequestEnvelope {
    /// Create a request carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            raw_message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.structured_params.insert(key.into(), value);
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tier(mut self, tier: UserTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn requiring_all(mut self) -> Self {
        self.require_all = true;
        self
    }
}

/// Who is calling, as established by the front end.
///
/// Non-empty fields take precedence over the matching request fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallContext {
    #[serde(default)]
    pub user_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_tier: Option<UserTier>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl CallContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_tier(mut self, tier: UserTier) -> Self {
        self.user_tier = Some(tier);
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}
