use crate::output::{print_json, print_table};
use anyhow::Context;
use serde::Serialize;
use shipway_core::config::DeployConfig;
use shipway_core::service::{LifecycleController, SystemdManager};
use shipway_core::state::RunState;
use std::path::Path;

#[derive(Serialize)]
struct StatusReport {
    latest_run: Option<RunState>,
    services: Vec<(String, String)>,
}

pub fn run(root: &Path, json: bool) -> anyhow::Result<i32> {
    let config = DeployConfig::load(root).context("failed to load deployment config")?;
    let latest_run = RunState::latest(root)?;

    let manager = SystemdManager::new();
    let mut lifecycle = LifecycleController::new(&manager);
    let mut services = Vec::new();
    for unit in &config.services {
        let state = lifecycle.status(&unit.name)?;
        services.push((unit.name.clone(), state.to_string()));
    }

    if json {
        print_json(&StatusReport {
            latest_run,
            services,
        })?;
        return Ok(0);
    }

    match &latest_run {
        Some(run) => {
            println!("latest run: {} ({})", run.id, run.status);
            for (name, outcome) in run.stage_names.iter().zip(&run.outcomes) {
                println!("  {name:12} {outcome}");
            }
        }
        None => println!("no deployments recorded"),
    }

    if !services.is_empty() {
        println!();
        let rows = services
            .iter()
            .map(|(name, state)| vec![name.clone(), state.clone()])
            .collect();
        print_table(&["SERVICE", "STATE"], rows);
    }

    Ok(0)
}
