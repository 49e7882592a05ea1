//! Conversation state domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user turn in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub message: String,

    pub timestamp: DateTime<Utc>,

    /// Intent resolved for this turn, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    /// Keys to merge into the derived context when the turn is applied
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub context_updates: serde_json::Map<String, serde_json::Value>,
}

impl Turn {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: Utc::now(),
            intent: None,
            context_updates: serde_json::Map::new(),
        }
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn with_context_updates(mut self, updates: serde_json::Map<String, serde_json::Value>) -> Self {
        self.context_updates = updates;
        self
    }
}

/// Accumulated state of one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: String,

    pub user_id: String,

    /// Turns in arrival order
    pub turn_history: Vec<Turn>,

    /// Number of turns ever applied (not capped by history trimming)
    pub interaction_count: u64,

    /// Emotional state, friendship level, last intent, skill-written keys
    pub derived_context: serde_json::Map<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            turn_history: Vec::new(),
            interaction_count: 0,
            derived_context: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The most recent turn, if any.
    pub fn last_turn(&self) -> Option<&Turn> {
        self.turn_history.last()
    }
}
