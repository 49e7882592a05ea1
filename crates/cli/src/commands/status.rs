//! `tripweave status`: Show the effective configuration.

use tripweave_config::AppConfig;

use crate::runtime::build_registry;

pub fn run(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = build_registry();
    let o = &config.orchestrator;

    println!("Tripweave Status");
    println!("================");
    println!("  Config dir:    {}", AppConfig::config_dir().display());
    println!("  Timeout:       {} ms (+{} ms grace)", o.timeout_ms, o.grace_ms);
    println!("  Retries:       {} (backoff {} ms)", o.max_retries, o.retry_backoff_ms);
    println!("  Require all:   {}", o.require_all);
    println!("  Stub fallback: {}", o.stub_fallback);
    println!("  Result cache:  {}", if o.cache_results { "enabled" } else { "disabled" });
    println!("  Cache remote:  {}", config.cache.remote_backend);
    println!("  Freshness:     {} s", config.cache.freshness_secs);
    println!("  Log level:     {} ({})", config.logging.level, config.logging.format);
    println!("  Capabilities:  {}", registry.capabilities().join(", "));
    println!("  Providers:     {}", registry.provider_names().join(", "));

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  Config file found");
    } else {
        println!("\n  No config file, using defaults. Run `tripweave init` to create one.");
    }

    Ok(())
}
