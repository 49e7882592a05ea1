//! `tripweave cache`: Inspect or clear the hybrid cache.

use tripweave_cache::build_from_config;
use tripweave_config::AppConfig;

pub async fn health(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let cache = build_from_config(&config.cache).await;
    let health = cache.health_check().await;
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}

pub async fn clear(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let cache = build_from_config(&config.cache).await;
    cache.clear().await;
    println!("Cache cleared ({} backend)", config.cache.remote_backend);
    Ok(())
}
