//! Conversation state store for Tripweave.
//!
//! Holds per-conversation turn history and derived context. State lives in
//! process memory; eviction is governed by an [`EvictionPolicy`].

pub mod derive;
pub mod store;

pub use store::{CommitReceipt, ConversationStore, EvictionPolicy, TurnTicket};
