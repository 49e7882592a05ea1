//! Derived conversation context: friendship level, emotional state, last intent.

use serde_json::{Map, Value};
use tripweave_core::conversation::Turn;

pub const FRIENDSHIP_LEVEL: &str = "friendship_level";
pub const EMOTIONAL_STATE: &str = "emotional_state";
pub const LAST_INTENT: &str = "last_intent";

/// Relationship stage implied by how many turns a conversation has seen.
pub fn friendship_level(interaction_count: u64) -> &'static str {
    match interaction_count {
        0..2 => "stranger",
        2..5 => "acquaintance",
        5..15 => "friend",
        _ => "close_friend",
    }
}

// First matching row wins.
const EMOTION_LEXICON: &[(&str, &[&str])] = &[
    (
        "frustrated",
        &["frustrat", "annoy", "ridiculous", "useless", "terrible", "angry", "fed up"],
    ),
    (
        "anxious",
        &["worried", "nervous", "anxious", "scared", "afraid", "stress", "panic"],
    ),
    (
        "excited",
        &["excited", "can't wait", "cant wait", "amazing", "awesome", "thrilled"],
    ),
    ("happy", &["thank", "great", "love", "happy", "perfect", "wonderful"]),
];

/// Classify the emotional tone of a message.
pub fn emotional_state(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    EMOTION_LEXICON
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(state, _)| *state)
        .unwrap_or("neutral")
}

/// Refresh `context` after `turn` brought the count to `interaction_count`.
///
/// Skill-written updates are merged last and win over derived keys.
pub fn refresh(context: &mut Map<String, Value>, turn: &Turn, interaction_count: u64) {
    context.insert(
        FRIENDSHIP_LEVEL.into(),
        Value::from(friendship_level(interaction_count)),
    );
    context.insert(EMOTIONAL_STATE.into(), Value::from(emotional_state(&turn.message)));
    if let Some(intent) = &turn.intent {
        context.insert(LAST_INTENT.into(), Value::from(intent.as_str()));
    }
    for (key, value) in &turn.context_updates {
        context.insert(key.clone(), value.clone());
    }
}
