//! Weather outlook skill: returns deterministic mock forecasts.
//!
//! Stands in for a real weather API so the `weather` capability answers
//! end-to-end without network access.

use serde::Serialize;
use tripweave_core::error::SkillError;
use tripweave_core::skill::{SharedState, SkillMetadata};

pub const WEATHER_SKILL: &str = "weather_outlook";

#[derive(Debug, Serialize)]
struct Outlook {
    location: String,
    temperature: f64,
    units: &'static str,
    conditions: &'static str,
    humidity: u32,
    mock: bool,
}

const CONDITIONS: [&str; 8] = [
    "Clear skies",
    "Partly cloudy",
    "Overcast",
    "Light rain",
    "Heavy rain",
    "Thunderstorms",
    "Snow",
    "Foggy",
];

fn outlook(location: &str, imperial: bool) -> Outlook {
    let hash = location
        .to_lowercase()
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));

    let celsius = f64::from(hash % 40) - 5.0;
    let (temperature, units) = if imperial {
        (celsius * 9.0 / 5.0 + 32.0, "°F")
    } else {
        (celsius, "°C")
    };

    Outlook {
        location: location.to_string(),
        temperature: (temperature * 10.0).round() / 10.0,
        units,
        conditions: CONDITIONS[(hash as usize / 7) % CONDITIONS.len()],
        humidity: 30 + hash % 60,
        mock: true,
    }
}

/// The capitalized word following "in", "to" or "for", if any.
fn place_in_message(message: &str) -> Option<String> {
    let words: Vec<&str> = message.split_whitespace().collect();
    words.windows(2).find_map(|pair| {
        let place = pair[1].trim_matches(|c: char| !c.is_alphanumeric());
        let preposition = matches!(pair[0].to_lowercase().as_str(), "in" | "to" | "for");
        (preposition && place.chars().next().is_some_and(char::is_uppercase)).then(|| place.to_string())
    })
}

/// `{destination | location | message, units?}` → outlook. Records the location as
/// `last_destination` in the shared state.
pub async fn weather_outlook(params: serde_json::Value, state: SharedState) -> Result<serde_json::Value, SkillError> {
    let explicit = params
        .get("destination")
        .or_else(|| params.get("location"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string);
    let location = explicit
        .or_else(|| params.get("message").and_then(|v| v.as_str()).and_then(place_in_message))
        .ok_or_else(|| SkillError::InvalidParams("missing 'destination'".into()))?;
    let location = location.as_str();

    let imperial = params.get("units").and_then(|v| v.as_str()) == Some("imperial");
    state
        .set("last_destination", serde_json::Value::from(location))
        .await;

    serde_json::to_value(outlook(location, imperial)).map_err(|e| SkillError::ExecutionFailed {
        skill: WEATHER_SKILL.into(),
        reason: e.to_string(),
    })
}

pub fn metadata() -> SkillMetadata {
    SkillMetadata::new("Mock weather outlook for a destination").with_capabilities(["weather"])
}
