//! The request orchestrator, the heart of Tripweave.
//!
//! Every request follows the same path:
//!
//! 1. **Validate** the raw envelope (sanitize, coerce, default the user)
//! 2. **Resolve intent** from explicit capabilities or the intent router
//! 3. **Dispatch** every capability in parallel under one global deadline,
//!    consulting the hybrid cache first and retrying failures
//! 4. **Aggregate** into a uniform envelope; partial success is success
//! 5. **Commit** the turn to the conversation store
//!
//! `orchestrate` never returns an error: every outcome is an
//! [`OrchestrationResult`].

pub mod dispatch;
pub mod intent;
pub mod orchestrator;
pub mod validation;

#[cfg(test)]
mod test_helpers;

pub use dispatch::{CapabilityPlan, DispatchPolicy, Dispatcher};
pub use intent::{DEFAULT_INTENT, Intent, IntentRouter, IntentRule, KeywordIntentRouter};
pub use orchestrator::{EXPLICIT_INTENT, OrchestrationResult, Orchestrator, ResultMetadata, Stage};
pub use validation::{RequestValidator, ValidatedRequest, sanitize_message};
