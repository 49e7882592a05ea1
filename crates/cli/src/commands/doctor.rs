//! `tripweave doctor`: Diagnose config and cache health.

use tripweave_cache::{HealthStatus, build_remote};
use tripweave_config::AppConfig;

use crate::runtime::build_orchestrator;

pub async fn run(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("Tripweave Doctor");
    println!("================\n");

    let mut issues = 0;

    match config.validate() {
        Ok(()) => println!("  ok    configuration valid"),
        Err(e) => {
            println!("  FAIL  configuration invalid: {e}");
            issues += 1;
        }
    }

    match build_remote(&config.cache).await {
        Ok(remote) => println!("  ok    remote cache backend '{}' opened", remote.name()),
        Err(e) => {
            println!("  FAIL  remote cache backend: {e}");
            issues += 1;
        }
    }

    let orchestrator = build_orchestrator(config).await;
    let health = orchestrator.cache().health_check().await;
    match health.status {
        HealthStatus::Healthy => println!("  ok    cache healthy"),
        HealthStatus::Degraded => {
            println!(
                "  WARN  cache degraded: {}",
                health.remote.error.as_deref().unwrap_or("remote unreachable")
            );
            issues += 1;
        }
    }

    for capability in orchestrator.registry().capabilities() {
        println!("  ok    capability '{capability}' registered");
    }

    println!();
    if issues == 0 {
        println!("  All checks passed.");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
