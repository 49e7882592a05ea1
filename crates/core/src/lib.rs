//! # Tripweave Core
//!
//! Domain types, traits, and error definitions for the Tripweave
//! orchestration engine. This crate has no framework dependencies beyond
//! `tokio` primitives. It defines the domain model that all other crates
//! implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem seam is a trait here: capability providers, the remote
//! cache tier, and skill handlers. Implementations live in their respective
//! crates, so they can be swapped via configuration and stubbed in tests.

pub mod cache;
pub mod conversation;
pub mod error;
pub mod event;
pub mod provider;
pub mod request;
pub mod skill;

// Re-export key types at crate root for ergonomics
pub use cache::{CacheEntry, CacheLookup, CacheSource, RemoteCache};
pub use conversation::{ConversationState, Turn};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use provider::{
    CapabilityProvider, FailureKind, ProviderContext, ProviderOutput, ProviderResult,
};
pub use request::{CallContext, RequestEnvelope, UserTier};
pub use skill::{SharedState, SkillHandler, SkillMetadata, SkillRegistry, SkillResult};
