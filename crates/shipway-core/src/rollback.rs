//! Reverse-order rollback over a recorded run.
//!
//! Walks the stage list backwards from the stage that ran last, invoking each
//! stage's declared rollback action exactly once. A rollback failure for one
//! stage never stops the walk; failures are collected so the operator sees
//! the full picture instead of the first casualty.

use crate::pipeline::{Stage, StageContext};
use crate::state::{RunState, StageOutcome};

/// What a rollback walk accomplished.
#[derive(Debug, Clone, Default)]
pub struct RollbackReport {
    pub reverted: Vec<String>,
    pub failures: Vec<String>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Roll back every stage the run touched, in reverse order.
///
/// Stages that were skipped (precondition already satisfied) made no changes
/// and are not rolled back. The failing stage itself is included — its
/// rollback undoes only what its forward action recorded.
pub fn run(stages: &[Stage], state: &RunState, ctx: &StageContext) -> RollbackReport {
    let mut report = RollbackReport::default();
    let last = state.current_stage.min(stages.len().saturating_sub(1));

    for idx in (0..=last).rev() {
        let stage = &stages[idx];
        let touched = matches!(
            state.outcomes.get(idx),
            Some(StageOutcome::Succeeded | StageOutcome::Failed { .. })
        );
        if !touched || !stage.has_rollback() {
            continue;
        }
        tracing::info!(stage = stage.name, "rolling back");
        match stage.run_rollback(ctx) {
            Ok(()) => report.reverted.push(stage.name.to_string()),
            Err(e) => {
                tracing::error!(stage = stage.name, "rollback failed: {e}");
                report.failures.push(format!("{}: {e}", stage.name));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeployConfig;
    use crate::pipeline::DeploymentPlan;
    use crate::secrets;
    use crate::service::MockManager;
    use crate::state::RunState;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(dir: &TempDir, yaml: &str) -> StageContext {
        let config: DeployConfig = serde_yaml::from_str(yaml).unwrap();
        StageContext {
            root: dir.path().to_path_buf(),
            config,
            manager: Arc::new(MockManager::new()),
        }
    }

    #[test]
    fn skipped_stages_are_not_rolled_back() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "environment: staging\nsecrets: [s1]\n");
        secrets::provision(dir.path(), "s1", false).unwrap();

        let plan = DeploymentPlan::standard(&ctx.config);
        let mut state = RunState::new("staging", plan.stage_names());
        state.current_stage = plan.stages.len() - 1;
        for idx in 0..plan.stages.len() {
            state.record_outcome(idx, StageOutcome::Skipped);
        }

        let report = run(&plan.stages, &state, &ctx);
        assert!(report.reverted.is_empty());
        assert!(report.is_clean());
        // The pre-existing secret was untouched.
        assert!(secrets::exists(dir.path(), "s1"));
    }

    #[test]
    fn only_executed_prefix_is_walked() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "environment: staging\n");
        let plan = DeploymentPlan::standard(&ctx.config);
        let mut state = RunState::new("staging", plan.stage_names());
        // Failed at validate: nothing after it ever ran.
        state.current_stage = 0;
        state.record_outcome(
            0,
            StageOutcome::Failed {
                message: "missing tool".to_string(),
            },
        );

        let report = run(&plan.stages, &state, &ctx);
        assert!(report.reverted.is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn failures_are_collected_not_short_circuited() {
        let dir = TempDir::new().unwrap();
        // A previous generation exists but its destination directory is gone,
        // so the configure rollback fails while services still rolls back.
        let ctx = context(
            &dir,
            r#"
environment: staging
config_targets:
  - name: app
    template: /nonexistent/app.tmpl
    destination: /nonexistent/dir/app.conf
    params: {}
    validator: [true]
services:
  - name: web
    exec: /bin/true
"#,
        );
        let prev = crate::paths::prev_config_path(
            dir.path(),
            &ctx.config.config_targets[0].destination,
        );
        std::fs::create_dir_all(prev.parent().unwrap()).unwrap();
        std::fs::write(&prev, "value = previous\n").unwrap();
        let plan = DeploymentPlan::standard(&ctx.config);
        let mut state = RunState::new("staging", plan.stage_names());
        let configure_idx = plan
            .stages
            .iter()
            .position(|s| s.name == "configure")
            .unwrap();
        let services_idx = plan
            .stages
            .iter()
            .position(|s| s.name == "services")
            .unwrap();
        state.current_stage = services_idx;
        state.record_outcome(configure_idx, StageOutcome::Succeeded);
        state.record_outcome(
            services_idx,
            StageOutcome::Failed {
                message: "start failed".to_string(),
            },
        );

        let report = run(&plan.stages, &state, &ctx);
        // Services rolled back cleanly even though configure's rollback
        // could not restore anything.
        assert!(report.reverted.contains(&"services".to_string()));
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].starts_with("configure:"));
    }
}
