use crate::output::{print_json, print_table};
use anyhow::Context;
use shipway_core::config::DeployConfig;
use shipway_core::health;
use shipway_core::health::HealthStatus;
use std::path::Path;

pub fn run(root: &Path, target: Option<&str>, json: bool) -> anyhow::Result<i32> {
    let config = DeployConfig::load(root).context("failed to load deployment config")?;
    let report = match target {
        Some(name) => health::check_target(&config.health, name)?,
        None => health::check(&config.health)?,
    };

    if json {
        print_json(&report)?;
    } else {
        let rows = report
            .reports
            .iter()
            .map(|r| {
                vec![
                    r.name.clone(),
                    r.status.to_string(),
                    format!("{}ms", r.latency_ms),
                    r.error.clone().unwrap_or_default(),
                ]
            })
            .collect();
        print_table(&["TARGET", "STATUS", "LATENCY", "ERROR"], rows);
        println!("\noverall: {}", report.overall);
    }

    Ok(match report.overall {
        HealthStatus::Unhealthy => 1,
        _ => 0,
    })
}
