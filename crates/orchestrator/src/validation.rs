//! Request sanitization and validation.

use serde_json::{Map, Value};
use tripweave_config::ValidationConfig;
use tripweave_core::error::ValidationError;
use tripweave_core::request::{CallContext, RequestEnvelope, UserTier};

/// A request that passed validation. Immutable from here on.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub message: String,
    pub user_id: String,
    pub tier: UserTier,
    pub conversation_id: Option<String>,
    pub params: Map<String, Value>,
    pub capabilities: Vec<String>,
    pub require_all: bool,
}

/// Trim, strip control characters, collapse whitespace runs, truncate to
/// `max_chars` characters.
pub fn sanitize_message(raw: &str, max_chars: usize) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max_chars) {
        Some((cut, _)) => collapsed[..cut].trim_end().to_string(),
        None => collapsed,
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidParam {
        field: field.into(),
        reason: reason.into(),
    }
}

/// `travelers` must be a positive integer; numeric strings are accepted.
fn coerce_travelers(value: &Value) -> Result<Value, ValidationError> {
    let n = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n > 0 => Ok(Value::from(n)),
        _ => Err(invalid("travelers", format!("expected a positive integer, got {value}"))),
    }
}

/// `budget` must be a non-negative number; numeric strings (with an optional
/// currency symbol or thousands separators) are accepted.
fn coerce_budget(value: &Value) -> Result<Value, ValidationError> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .trim_start_matches(['$', '€', '£'])
            .replace(',', "")
            .parse::<f64>()
            .ok(),
        _ => None,
    };
    match n {
        Some(n) if n.is_finite() && n >= 0.0 => Ok(if n.fract() == 0.0 && n <= u64::MAX as f64 {
            Value::from(n as u64)
        } else {
            Value::from(n)
        }),
        _ => Err(invalid("budget", format!("expected a non-negative number, got {value}"))),
    }
}

/// Validates inbound requests against the configured limits.
#[derive(Debug, Clone)]
pub struct RequestValidator {
    config: ValidationConfig,
}

impl RequestValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// The id used when neither the call nor the request names a user.
    pub fn guest_user_id(&self) -> &str {
        &self.config.guest_user_id
    }

    /// Sanitize and validate `request`. Non-empty call-context fields win.
    pub fn validate(
        &self,
        request: &RequestEnvelope,
        call: &CallContext,
    ) -> Result<ValidatedRequest, ValidationError> {
        let message = sanitize_message(&request.raw_message, self.config.max_message_chars);
        let len = message.chars().count();
        if len == 0 {
            return Err(ValidationError::EmptyMessage);
        }
        if len < self.config.min_message_chars {
            return Err(ValidationError::MessageTooShort {
                len,
                min: self.config.min_message_chars,
            });
        }

        let mut params = request.structured_params.clone();
        if let Some(v) = params.get("travelers") {
            let coerced = coerce_travelers(v)?;
            params.insert("travelers".into(), coerced);
        }
        if let Some(v) = params.get("budget") {
            let coerced = coerce_budget(v)?;
            params.insert("budget".into(), coerced);
        }

        let user_id = [call.user_id.trim(), request.user_id.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or(self.config.guest_user_id.as_str())
            .to_string();

        let conversation_id = [call.conversation_id.as_deref(), request.conversation_id.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string);

        let capabilities = request
            .capabilities
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        Ok(ValidatedRequest {
            message,
            user_id,
            tier: call.user_tier.unwrap_or(request.tier),
            conversation_id,
            params,
            capabilities,
            require_all: request.require_all,
        })
    }
}

impl Default for RequestValidator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}
