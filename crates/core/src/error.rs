//! Error types for the Tripweave domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Tripweave operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Request validation ---
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Skill errors ---
    #[error("Skill error: {0}")]
    Skill(#[from] SkillError),

    // --- Cache errors ---
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    // --- Registry errors ---
    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// A malformed inbound request. Never reaches provider dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("message is too short: {len} characters, at least {min} required")]
    MessageTooShort { len: usize, min: usize },

    #[error("invalid value for '{field}': {reason}")]
    InvalidParam { field: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Provider '{provider}' failed: {message}")]
    ExecutionFailed { provider: String, message: String },

    #[error("Provider '{provider}' timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("Provider '{provider}' panicked: {message}")]
    Panicked { provider: String, message: String },

    #[error("Invalid provider input: {0}")]
    InvalidInput(String),
}

impl ProviderError {
    /// Convenience constructor for the common failure case.
    pub fn failed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SkillError {
    #[error("skill not found: {0}")]
    NotFound(String),

    #[error("skill '{skill}' failed: {reason}")]
    ExecutionFailed { skill: String, reason: String },

    #[error("invalid skill parameters: {0}")]
    InvalidParams(String),
}

/// Remote cache tier failures. Always degraded to a miss by the hybrid cache.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Remote cache unavailable: {0}")]
    Unavailable(String),

    #[error("Remote cache operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cache entry could not be decoded: {0}")]
    Decode(String),
}

/// Rejected provider registration. Logged, never fatal to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("provider has an empty name")]
    EmptyName,

    #[error("provider '{0}' declares no capabilities")]
    NoCapabilities(String),

    #[error("provider '{provider}' does not declare capability '{capability}'")]
    UndeclaredCapability { provider: String, capability: String },

    #[error("capability name is empty")]
    EmptyCapability,
}
