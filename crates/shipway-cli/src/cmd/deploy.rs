use crate::output::print_json;
use anyhow::Context;
use shipway_core::config::DeployConfig;
use shipway_core::pipeline;
use shipway_core::service::SystemdManager;
use shipway_core::state::RunStatus;
use std::path::Path;
use std::sync::Arc;

pub fn run(root: &Path, json: bool) -> anyhow::Result<i32> {
    let config = DeployConfig::load(root).context("failed to load deployment config")?;
    for warning in config.validate() {
        tracing::warn!("{}", warning.message);
    }

    let manager = Arc::new(SystemdManager::new());
    let summary = pipeline::run(root, &config, manager)?;

    if json {
        print_json(&summary)?;
    } else {
        print_summary(&summary);
    }

    Ok(match summary.status {
        RunStatus::Succeeded => 0,
        RunStatus::RolledBack => 2,
        RunStatus::RollbackFailed => 3,
        _ => 1,
    })
}

pub fn print_summary(summary: &pipeline::RunSummary) {
    println!(
        "run {} ({}): {}",
        summary.run_id, summary.environment, summary.status
    );
    for (stage, outcome) in &summary.outcomes {
        println!("  {stage:12} {outcome}");
    }
    if let Some(stage) = &summary.failed_stage {
        let detail = summary.failure.as_deref().unwrap_or("unknown");
        println!("failed at {stage}: {detail}");
    }
    for failure in &summary.rollback_failures {
        println!("rollback failure: {failure}");
    }
    if let Some(snapshot) = &summary.snapshot {
        println!("pre-run snapshot: {snapshot}");
    }
}
