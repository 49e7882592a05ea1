//! Intent detection: maps an utterance to the capabilities it needs.

use serde::{Deserialize, Serialize};

pub const DEFAULT_INTENT: &str = "simple_response";

/// A detected intent and the capabilities it fans out to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    pub capabilities: Vec<String>,
}

impl Intent {
    pub fn new<I, S>(name: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }
}

/// Classifies a sanitized message. Must be deterministic.
pub trait IntentRouter: Send + Sync {
    fn detect_intent(&self, message: &str) -> Intent;
}

/// One row of the keyword table.
#[derive(Debug, Clone)]
pub struct IntentRule {
    pub intent: Intent,
    pub keywords: Vec<String>,
}

impl IntentRule {
    pub fn new(intent: Intent, keywords: &[&str]) -> Self {
        Self {
            intent,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    fn matches(&self, words: &[String]) -> bool {
        self.keywords.iter().any(|k| words.iter().any(|w| w == k))
    }
}

/// Ordered, case-insensitive, whole-word keyword matching. First rule wins.
#[derive(Debug, Clone)]
pub struct KeywordIntentRouter {
    rules: Vec<IntentRule>,
    fallback: Intent,
}

impl KeywordIntentRouter {
    pub fn new(rules: Vec<IntentRule>, fallback: Intent) -> Self {
        Self { rules, fallback }
    }

    pub fn rules(&self) -> &[IntentRule] {
        &self.rules
    }

    fn words(message: &str) -> Vec<String> {
        message
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Default for KeywordIntentRouter {
    fn default() -> Self {
        let rules = vec![
            IntentRule::new(
                Intent::new("plan_trip", ["flight_search", "hotel_search"]),
                &["plan", "trip", "itinerary", "vacation", "holiday", "getaway"],
            ),
            IntentRule::new(
                Intent::new("search_flights", ["flight_search"]),
                &["flight", "flights", "fly", "flying", "airline", "plane", "airport"],
            ),
            IntentRule::new(
                Intent::new("search_hotels", ["hotel_search"]),
                &["hotel", "hotels", "stay", "accommodation", "room", "resort", "hostel"],
            ),
            IntentRule::new(
                Intent::new("check_weather", ["weather"]),
                &["weather", "forecast", "temperature", "rain", "sunny"],
            ),
            IntentRule::new(
                Intent::new("get_prices", ["pricing"]),
                &["price", "prices", "cost", "budget", "cheap", "expensive", "deal"],
            ),
        ];
        Self::new(rules, Intent::new(DEFAULT_INTENT, [DEFAULT_INTENT]))
    }
}

impl IntentRouter for KeywordIntentRouter {
    fn detect_intent(&self, message: &str) -> Intent {
        let words = Self::words(message);
        self.rules
            .iter()
            .find(|rule| rule.matches(&words))
            .map(|rule| rule.intent.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}
