use anyhow::Context;
use shipway_core::config::DeployConfig;
use shipway_core::pipeline;
use shipway_core::service::SystemdManager;
use shipway_core::state::RunStatus;
use shipway_core::ShipwayError;
use std::path::Path;
use std::sync::Arc;

pub fn run(root: &Path, run_id: Option<&str>, json: bool) -> anyhow::Result<i32> {
    let config = DeployConfig::load(root).context("failed to load deployment config")?;
    let manager = Arc::new(SystemdManager::new());
    let summary = pipeline::rollback_run(root, &config, manager, run_id)?;

    if json {
        crate::output::print_json(&summary)?;
    } else {
        crate::cmd::deploy::print_summary(&summary);
    }

    if summary.status == RunStatus::RollbackFailed {
        return Err(ShipwayError::RollbackPartialFailure {
            total: summary.rollback_failures.len(),
            failures: summary.rollback_failures.clone(),
        }
        .into());
    }
    Ok(0)
}
