//! Domain event system: decoupled observation of the orchestration pipeline.
//!
//! Events are published when something interesting happens in the system.
//! Other components can subscribe to react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A request passed validation
    RequestReceived {
        request_id: String,
        conversation_id: String,
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    /// One capability finished (success, failure, timeout or cache hit)
    CapabilityDispatched {
        request_id: String,
        capability: String,
        provider: String,
        success: bool,
        timed_out: bool,
        cached: bool,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A background remote cache write finished
    CacheSyncCompleted {
        key: String,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// A turn was applied to a conversation
    ConversationUpdated {
        conversation_id: String,
        interaction_count: u64,
        timestamp: DateTime<Utc>,
    },

    /// The orchestrator produced its envelope
    RequestCompleted {
        request_id: String,
        success: bool,
        response_time_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
