//! `tripweave skill`: Run a registered skill.

use tripweave_config::AppConfig;
use tripweave_core::request::CallContext;

use crate::runtime::build_orchestrator;

pub async fn run(
    config: &AppConfig,
    name: &str,
    params: &str,
    conversation: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let params: serde_json::Value =
        serde_json::from_str(params).map_err(|e| format!("params must be JSON: {e}"))?;
    let orchestrator = build_orchestrator(config).await;

    let mut call = CallContext::default();
    call.conversation_id = conversation;

    let result = orchestrator.run_skill(name, params, &call).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
