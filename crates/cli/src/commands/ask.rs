//! `tripweave ask`: Orchestrate one message.

use tripweave_config::AppConfig;
use tripweave_core::request::{CallContext, RequestEnvelope, UserTier};

use crate::runtime::build_orchestrator;

pub struct AskArgs {
    pub message: String,
    pub conversation: Option<String>,
    pub user: Option<String>,
    pub tier: Option<UserTier>,
    pub capabilities: Vec<String>,
    pub params: Vec<String>,
    pub require_all: bool,
}

/// Parse `key=value`. Values that parse as JSON keep their type.
fn parse_param(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    let value = serde_json::from_str(value.trim())
        .unwrap_or_else(|_| serde_json::Value::String(value.trim().to_string()));
    Ok((key.to_string(), value))
}

pub async fn run(config: &AppConfig, args: AskArgs) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = build_orchestrator(config).await;

    let mut request = RequestEnvelope::new(args.message).with_capabilities(args.capabilities);
    for raw in &args.params {
        let (key, value) = parse_param(raw)?;
        request = request.with_param(key, value);
    }
    if args.require_all {
        request = request.requiring_all();
    }

    let mut call = CallContext::new(args.user.unwrap_or_default());
    call.user_tier = args.tier;
    call.conversation_id = args.conversation;

    let result = orchestrator.orchestrate(request, call).await;
    orchestrator.cache().flush().await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
