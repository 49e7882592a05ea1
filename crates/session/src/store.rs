//! In-process conversation store with ordered turn commits.
//!
//! Requests sharing a conversation reserve a [`TurnTicket`] when their
//! intent is resolved. Turns are applied strictly in ticket order through a
//! per-conversation reorder buffer: an early commit waits in the buffer, a
//! ticket dropped without committing is skipped. Committing never blocks.

use crate::derive;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tripweave_config::ConversationConfig;
use tripweave_core::conversation::{ConversationState, Turn};
use tripweave_core::event::{DomainEvent, EventBus};

/// Bounds on how many conversations are retained and for how long.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Least-recently-used conversations beyond this count are evicted
    pub max_conversations: Option<usize>,
    /// Conversations untouched for this long are evicted
    pub idle_ttl: Option<Duration>,
}

impl EvictionPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }
}

/// What happened to a committed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub conversation_id: String,
    pub sequence: u64,
    /// `false` when buffered behind an earlier, still-open ticket
    pub applied: bool,
    /// The conversation's count once this turn is applied
    pub interaction_count: u64,
}

struct Slot {
    state: ConversationState,
    last_access: Instant,
    next_ticket: u64,
    next_apply: u64,
    /// Buffered commits; `None` marks an abandoned ticket
    pending: BTreeMap<u64, Option<Turn>>,
}

impl Slot {
    fn new(state: ConversationState) -> Self {
        Self {
            state,
            last_access: Instant::now(),
            next_ticket: 0,
            next_apply: 0,
            pending: BTreeMap::new(),
        }
    }

    fn has_open_tickets(&self) -> bool {
        self.next_apply < self.next_ticket
    }
}

struct Shared {
    slots: Mutex<HashMap<String, Slot>>,
    policy: EvictionPolicy,
    max_history: Option<usize>,
    events: Option<Arc<EventBus>>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply every contiguous buffered commit starting at `next_apply`.
    fn drain(&self, slot: &mut Slot) {
        while let Some(entry) = slot.pending.remove(&slot.next_apply) {
            slot.next_apply += 1;
            let Some(turn) = entry else {
                debug!(conversation_id = %slot.state.id, "Skipped abandoned turn ticket");
                continue;
            };
            self.apply(slot, turn);
        }
    }

    fn apply(&self, slot: &mut Slot, turn: Turn) {
        let state = &mut slot.state;
        state.interaction_count += 1;
        derive::refresh(&mut state.derived_context, &turn, state.interaction_count);
        state.turn_history.push(turn);
        if let Some(max) = self.max_history
            && state.turn_history.len() > max
        {
            let excess = state.turn_history.len() - max;
            state.turn_history.drain(..excess);
        }
        state.updated_at = Utc::now();
        slot.last_access = Instant::now();

        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::ConversationUpdated {
                conversation_id: state.id.clone(),
                interaction_count: state.interaction_count,
                timestamp: state.updated_at,
            });
        }
    }

    fn commit(&self, conversation_id: &str, sequence: u64, turn: Option<Turn>) -> Option<CommitReceipt> {
        let mut slots = self.lock();
        let slot = slots.get_mut(conversation_id)?;

        let ahead = sequence.saturating_sub(slot.next_apply);
        slot.pending.insert(sequence, turn);
        self.drain(slot);

        let applied = slot.next_apply > sequence;
        let interaction_count = if applied {
            slot.state.interaction_count
        } else {
            slot.state.interaction_count + ahead + 1
        };
        Some(CommitReceipt {
            conversation_id: conversation_id.to_string(),
            sequence,
            applied,
            interaction_count,
        })
    }
}

/// A reserved position in a conversation's turn order.
///
/// Dropping the ticket without committing releases its position.
pub struct TurnTicket {
    shared: Arc<Shared>,
    conversation_id: String,
    sequence: u64,
    committed: bool,
}

impl TurnTicket {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Apply `turn` at this ticket's position.
    ///
    /// Returns `None` if the conversation no longer exists.
    pub fn commit(mut self, turn: Turn) -> Option<CommitReceipt> {
        self.committed = true;
        self.shared.commit(&self.conversation_id, self.sequence, Some(turn))
    }
}

impl Drop for TurnTicket {
    fn drop(&mut self) {
        if !self.committed {
            self.shared.commit(&self.conversation_id, self.sequence, None);
        }
    }
}

impl std::fmt::Debug for TurnTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnTicket")
            .field("conversation_id", &self.conversation_id)
            .field("sequence", &self.sequence)
            .field("committed", &self.committed)
            .finish()
    }
}

/// Conversation state keyed by conversation id. Cloning shares the store.
#[derive(Clone)]
pub struct ConversationStore {
    shared: Arc<Shared>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::with_policy(EvictionPolicy::unbounded(), None)
    }

    pub fn with_policy(policy: EvictionPolicy, max_history: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                slots: Mutex::new(HashMap::new()),
                policy,
                max_history,
                events: None,
            }),
        }
    }

    pub fn from_config(config: &ConversationConfig) -> Self {
        Self::with_policy(
            EvictionPolicy {
                max_conversations: config.max_conversations,
                idle_ttl: config.idle_ttl_secs.map(Duration::from_secs),
            },
            config.max_history,
        )
    }

    /// Attach an event bus. Must be called before the store is cloned.
    pub fn with_event_bus(self, bus: Arc<EventBus>) -> Self {
        match Arc::try_unwrap(self.shared) {
            Ok(mut shared) => {
                shared.events = Some(bus);
                Self {
                    shared: Arc::new(shared),
                }
            }
            Err(shared) => Self { shared },
        }
    }

    /// Fetch the conversation, creating it for `user_id` if absent.
    pub fn get_or_create(&self, conversation_id: &str, user_id: &str) -> ConversationState {
        self.evict_expired();
        let mut slots = self.shared.lock();
        let created = !slots.contains_key(conversation_id);
        let slot = slots
            .entry(conversation_id.to_string())
            .or_insert_with(|| Slot::new(ConversationState::new(conversation_id, user_id)));
        slot.last_access = Instant::now();
        let state = slot.state.clone();

        if created {
            debug!(conversation_id, user_id, "Created conversation");
            self.enforce_capacity(&mut slots, conversation_id);
        }
        state
    }

    /// Snapshot of a conversation, if it exists.
    pub fn get_by_id(&self, conversation_id: &str) -> Option<ConversationState> {
        self.shared.lock().get(conversation_id).map(|s| s.state.clone())
    }

    /// Reserve the next position in the conversation's turn order.
    pub fn reserve(&self, conversation_id: &str) -> Option<TurnTicket> {
        let mut slots = self.shared.lock();
        let slot = slots.get_mut(conversation_id)?;
        let sequence = slot.next_ticket;
        slot.next_ticket += 1;
        slot.last_access = Instant::now();
        Some(TurnTicket {
            shared: Arc::clone(&self.shared),
            conversation_id: conversation_id.to_string(),
            sequence,
            committed: false,
        })
    }

    /// Append a turn behind every ticket already reserved.
    pub fn append(&self, conversation_id: &str, turn: Turn) -> Option<CommitReceipt> {
        self.reserve(conversation_id)?.commit(turn)
    }

    /// Evict conversations idle longer than the policy allows.
    ///
    /// Conversations with open tickets are kept.
    pub fn evict_expired(&self) -> usize {
        let Some(ttl) = self.shared.policy.idle_ttl else {
            return 0;
        };
        let mut slots = self.shared.lock();
        let before = slots.len();
        slots.retain(|_, slot| slot.has_open_tickets() || slot.last_access.elapsed() < ttl);
        let evicted = before - slots.len();
        if evicted > 0 {
            info!(evicted, "Evicted idle conversations");
        }
        evicted
    }

    fn enforce_capacity(&self, slots: &mut HashMap<String, Slot>, keep: &str) {
        let Some(max) = self.shared.policy.max_conversations else {
            return;
        };
        while slots.len() > max {
            let victim = slots
                .iter()
                .filter(|(id, slot)| id.as_str() != keep && !slot.has_open_tickets())
                .min_by_key(|(_, slot)| slot.last_access)
                .map(|(id, _)| id.clone());
            match victim {
                Some(id) => {
                    slots.remove(&id);
                    debug!(conversation_id = %id, "Evicted least-recently-used conversation");
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let store = ConversationStore::new();
        let a = store.get_or_create("c1", "alice");
        let b = store.get_or_create("c1", "bob");
        assert_eq!(a.id, "c1");
        assert_eq!(b.user_id, "alice");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn append_increments_and_derives() {
        let store = ConversationStore::new();
        store.get_or_create("c1", "u");

        store.append("c1", Turn::new("hello").with_intent("simple_response")).unwrap();
        let receipt = store
            .append("c1", Turn::new("so excited for Dubai").with_intent("plan_trip"))
            .unwrap();
        assert!(receipt.applied);
        assert_eq!(receipt.interaction_count, 2);

        let state = store.get_by_id("c1").unwrap();
        assert_eq!(state.interaction_count, 2);
        assert_eq!(state.turn_history.len(), 2);
        assert_eq!(state.derived_context["friendship_level"], "acquaintance");
        assert_eq!(state.derived_context["emotional_state"], "excited");
        assert_eq!(state.derived_context["last_intent"], "plan_trip");
    }

    #[test]
    fn append_to_unknown_conversation_is_none() {
        let store = ConversationStore::new();
        assert!(store.append("nope", Turn::new("hi")).is_none());
        assert!(store.get_by_id("nope").is_none());
    }

    #[test]
    fn out_of_order_commits_apply_in_ticket_order() {
        let store = ConversationStore::new();
        store.get_or_create("c1", "u");

        let first = store.reserve("c1").unwrap();
        let second = store.reserve("c1").unwrap();

        let receipt = second.commit(Turn::new("second"));
        let receipt = receipt.unwrap();
        assert!(!receipt.applied);
        assert_eq!(receipt.interaction_count, 2);
        assert_eq!(store.get_by_id("c1").unwrap().interaction_count, 0);

        assert!(first.commit(Turn::new("first")).unwrap().applied);
        let state = store.get_by_id("c1").unwrap();
        let messages: Vec<_> = state.turn_history.iter().map(|t| t.message.as_str()).collect();
        assert_eq!(messages, ["first", "second"]);
        assert_eq!(state.interaction_count, 2);
    }

    #[test]
    fn dropped_ticket_is_skipped() {
        let store = ConversationStore::new();
        store.get_or_create("c1", "u");

        let abandoned = store.reserve("c1").unwrap();
        let later = store.reserve("c1").unwrap();
        later.commit(Turn::new("later"));
        drop(abandoned);

        let state = store.get_by_id("c1").unwrap();
        assert_eq!(state.interaction_count, 1);
        assert_eq!(state.turn_history[0].message, "later");
    }

    #[test]
    fn history_cap_keeps_count() {
        let store = ConversationStore::with_policy(EvictionPolicy::unbounded(), Some(2));
        store.get_or_create("c1", "u");
        for i in 0..5 {
            store.append("c1", Turn::new(format!("m{i}")));
        }
        let state = store.get_by_id("c1").unwrap();
        assert_eq!(state.interaction_count, 5);
        assert_eq!(state.turn_history.len(), 2);
        assert_eq!(state.turn_history[0].message, "m3");
    }

    #[test]
    fn lru_eviction_spares_open_tickets() {
        let policy = EvictionPolicy {
            max_conversations: Some(2),
            idle_ttl: None,
        };
        let store = ConversationStore::with_policy(policy, None);
        store.get_or_create("oldest", "u");
        let _ticket = store.reserve("oldest").unwrap();
        std::thread::sleep(Duration::from_millis(2));
        store.get_or_create("middle", "u");
        std::thread::sleep(Duration::from_millis(2));
        store.get_or_create("newest", "u");

        assert_eq!(store.len(), 2);
        assert!(store.get_by_id("oldest").is_some());
        assert!(store.get_by_id("middle").is_none());
    }

    #[test]
    fn idle_conversations_expire() {
        let policy = EvictionPolicy {
            max_conversations: None,
            idle_ttl: Some(Duration::from_millis(5)),
        };
        let store = ConversationStore::with_policy(policy, None);
        store.get_or_create("c1", "u");
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(store.evict_expired(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn concurrent_appends_lose_nothing() {
        let store = ConversationStore::new();
        store.get_or_create("c1", "u");

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append("c1", Turn::new(format!("m{i}")))
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get_by_id("c1").unwrap().interaction_count, 32);
    }

    #[tokio::test]
    async fn updates_are_published() {
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let store = ConversationStore::new().with_event_bus(bus);
        store.get_or_create("c1", "u");
        store.append("c1", Turn::new("hi"));

        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::ConversationUpdated { conversation_id, interaction_count, .. } => {
                assert_eq!(conversation_id, "c1");
                assert_eq!(*interaction_count, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
