//! Skill execution for Tripweave.
//!
//! Skills are named handlers run with parameters and a shared conversational
//! state. The [`SkillExecutor`] is the failure boundary for both skills and
//! capability providers; [`SkillProvider`] lets a skill serve a capability.

pub mod adapter;
pub mod executor;
pub mod weather;

pub use adapter::SkillProvider;
pub use executor::{SkillExecutor, panic_message};

use tripweave_core::skill::SkillRegistry;

/// Create a registry holding the built-in skills.
pub fn default_skills() -> SkillRegistry {
    let mut registry = SkillRegistry::new();
    registry.register(weather::WEATHER_SKILL, weather::weather_outlook, weather::metadata());
    registry
}
