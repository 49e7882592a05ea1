//! Built-in providers that ship with the engine.

use async_trait::async_trait;
use tripweave_core::error::ProviderError;
use tripweave_core::provider::{CapabilityProvider, ProviderContext, ProviderOutput};

/// Answers the `simple_response` capability with a short canned reply.
///
/// This is what the intent router falls back to, so the default path
/// returns a real (if modest) answer rather than a stub.
pub struct SimpleResponseProvider;

pub const SIMPLE_RESPONSE: &str = "simple_response";

impl SimpleResponseProvider {
    fn reply(message: &str, returning: bool) -> &'static str {
        let lower = message.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if has(&["thank", "thanks", "cheers"]) {
            "You're welcome! Let me know if there's anything else for your trip."
        } else if has(&["help", "what can you do"]) {
            "I can search flights and hotels, check prices and weather, and plan whole trips. Try \"plan a trip to Lisbon in May\"."
        } else if has(&["hello", "hi ", "hey", "good morning", "good evening"]) || lower.trim() == "hi" {
            if returning {
                "Welcome back! Where are we heading next?"
            } else {
                "Hello! Where would you like to go?"
            }
        } else {
            "Tell me where and when you'd like to travel and I'll take it from there."
        }
    }
}

#[async_trait]
impl CapabilityProvider for SimpleResponseProvider {
    fn name(&self) -> &str {
        "simple_response"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![SIMPLE_RESPONSE.into()]
    }

    fn priority(&self) -> i32 {
        -1
    }

    fn cacheable(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: ProviderContext) -> Result<ProviderOutput, ProviderError> {
        let returning = ctx
            .shared_state
            .get("friendship_level")
            .and_then(|v| v.as_str())
            .is_some_and(|level| level != "stranger");

        Ok(ProviderOutput::new(serde_json::json!({
            "text": Self::reply(&ctx.message, returning),
        })))
    }
}
