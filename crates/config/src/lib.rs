//! Configuration loading, validation, and management for Tripweave.
//!
//! Loads configuration from `~/.tripweave/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.tripweave/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Dispatch, timeout, and retry policy
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Inbound request validation
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Hybrid cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Conversation state retention
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Log level and format
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Global per-request deadline
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Slack allowed past the deadline before the request is cut off
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,

    /// Retries per failed capability (timeouts are not retried)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay of the exponential retry backoff (0 = retry immediately)
    #[serde(default)]
    pub retry_backoff_ms: u64,

    /// Require every dispatched capability to succeed
    #[serde(default)]
    pub require_all: bool,

    /// Answer unregistered capabilities with stub results
    #[serde(default = "default_true")]
    pub stub_fallback: bool,

    /// Serve and store provider results through the hybrid cache
    #[serde(default = "default_true")]
    pub cache_results: bool,

    /// TTL for cached provider results
    #[serde(default = "default_result_ttl")]
    pub result_ttl_secs: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}
fn default_grace_ms() -> u64 {
    50
}
fn default_max_retries() -> u32 {
    1
}
fn default_result_ttl() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

impl OrchestratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            grace_ms: default_grace_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: 0,
            require_all: false,
            stub_fallback: true,
            cache_results: true,
            result_ttl_secs: default_result_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_min_message_chars")]
    pub min_message_chars: usize,

    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    /// User id assigned to anonymous requests
    #[serde(default = "default_guest_user_id")]
    pub guest_user_id: String,
}

fn default_min_message_chars() -> usize {
    2
}
fn default_max_message_chars() -> usize {
    4000
}
fn default_guest_user_id() -> String {
    "guest".into()
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_message_chars: default_min_message_chars(),
            max_message_chars: default_max_message_chars(),
            guest_user_id: default_guest_user_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Local tier freshness window
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,

    /// Write local entries through to the remote tier in the background
    #[serde(default)]
    pub remote_sync: bool,

    /// "none", "memory", or "sqlite"
    #[serde(default = "default_remote_backend")]
    pub remote_backend: String,

    /// SQLite database path for the "sqlite" backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<String>,

    /// Upper bound on any single remote operation
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,
}

fn default_freshness_secs() -> u64 {
    300
}
fn default_remote_backend() -> String {
    "none".into()
}
fn default_remote_timeout_ms() -> u64 {
    2000
}

impl CacheConfig {
    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// SQLite path, defaulting to `~/.tripweave/cache.db`.
    pub fn sqlite_path(&self) -> String {
        self.sqlite_path.clone().unwrap_or_else(|| {
            AppConfig::config_dir()
                .join("cache.db")
                .to_string_lossy()
                .into_owned()
        })
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freshness_secs: default_freshness_secs(),
            remote_sync: false,
            remote_backend: default_remote_backend(),
            sqlite_path: None,
            remote_timeout_ms: default_remote_timeout_ms(),
        }
    }
}

/// Conversation retention. Everything unset means unbounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Least-recently-used conversations are evicted past this bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_conversations: Option<usize>,

    /// Conversations idle for longer than this are evicted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_ttl_secs: Option<u64>,

    /// Oldest turns are dropped past this many
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_history: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

const REMOTE_BACKENDS: &[&str] = &["none", "memory", "sqlite"];
const LOG_FORMATS: &[&str] = &["pretty", "json"];
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    /// Load configuration from the default path (~/.tripweave/config.toml).
    ///
    /// Environment variables override file values:
    /// - `TRIPWEAVE_TIMEOUT_MS`
    /// - `TRIPWEAVE_MAX_RETRIES`
    /// - `TRIPWEAVE_LOG_LEVEL`
    /// - `TRIPWEAVE_CACHE_BACKEND`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment-like lookup, then re-validate.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TRIPWEAVE_TIMEOUT_MS") {
            self.orchestrator.timeout_ms = parse_env("TRIPWEAVE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("TRIPWEAVE_MAX_RETRIES") {
            self.orchestrator.max_retries = parse_env("TRIPWEAVE_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("TRIPWEAVE_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("TRIPWEAVE_CACHE_BACKEND") {
            self.cache.remote_backend = v;
        }
        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".tripweave")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.timeout_ms must be > 0".into(),
            ));
        }

        if self.validation.min_message_chars == 0 {
            return Err(ConfigError::ValidationError(
                "validation.min_message_chars must be >= 1".into(),
            ));
        }

        if self.validation.max_message_chars < self.validation.min_message_chars {
            return Err(ConfigError::ValidationError(
                "validation.max_message_chars must be >= min_message_chars".into(),
            ));
        }

        if self.validation.guest_user_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "validation.guest_user_id must not be empty".into(),
            ));
        }

        if self.cache.freshness_secs == 0 {
            return Err(ConfigError::ValidationError(
                "cache.freshness_secs must be > 0".into(),
            ));
        }

        if !REMOTE_BACKENDS.contains(&self.cache.remote_backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "cache.remote_backend must be one of {REMOTE_BACKENDS:?}, got '{}'",
                self.cache.remote_backend
            )));
        }

        if self.conversation.max_conversations == Some(0) {
            return Err(ConfigError::ValidationError(
                "conversation.max_conversations must be > 0 when set".into(),
            ));
        }

        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.format must be one of {LOG_FORMATS:?}"
            )));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level must be one of {LOG_LEVELS:?}"
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{name} has invalid value '{value}'")))
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
