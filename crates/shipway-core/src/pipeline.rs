//! The deployment pipeline: an ordered, data-driven list of stages.
//!
//! Each stage declares its own precondition, forward action, and rollback
//! action, so partial-run recovery is driven by the persisted `RunState`
//! rather than by accidental script termination. The pipeline is strictly
//! sequential — later stages depend on the side effects of earlier ones —
//! while individual stages may fan out internally (health checks).

use crate::backup;
use crate::config::DeployConfig;
use crate::configure;
use crate::error::{Result, ShipwayError};
use crate::health;
use crate::health::HealthStatus;
use crate::install;
use crate::lock::DeployLock;
use crate::migrate;
use crate::retry::RetryPolicy;
use crate::rollback;
use crate::secrets;
use crate::service::{LifecycleController, ServiceManager, UnitState};
use crate::state::{RunState, RunStatus, StageOutcome};
use crate::validate;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Stage model
// ---------------------------------------------------------------------------

/// Everything a stage action may touch. Owned and shareable across the
/// timeout thread boundary.
pub struct StageContext {
    pub root: PathBuf,
    pub config: DeployConfig,
    pub manager: Arc<dyn ServiceManager + Send + Sync>,
}

type StageAction = Arc<dyn Fn(&StageContext) -> Result<()> + Send + Sync>;
type StagePrecondition = Box<dyn Fn(&StageContext) -> bool + Send + Sync>;

/// One atomic, idempotent unit of the pipeline. Immutable after plan build.
pub struct Stage {
    pub name: &'static str,
    /// Whether this stage changes host state. Failures before any mutating
    /// stage has run abort cleanly with nothing to roll back.
    pub mutating: bool,
    precondition: Option<StagePrecondition>,
    forward: StageAction,
    rollback: Option<StageAction>,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl Stage {
    /// True when the stage's effect is already in place and it can be skipped.
    pub fn already_satisfied(&self, ctx: &StageContext) -> bool {
        self.precondition.as_ref().map(|p| p(ctx)).unwrap_or(false)
    }

    pub fn has_rollback(&self) -> bool {
        self.rollback.is_some()
    }

    /// Invoke the declared rollback action once. Never retried automatically.
    pub fn run_rollback(&self, ctx: &StageContext) -> Result<()> {
        match &self.rollback {
            Some(action) => action(ctx),
            None => Ok(()),
        }
    }
}

/// Ordered stage list. Stage order is deterministic and fixed once a run starts.
pub struct DeploymentPlan {
    pub stages: Vec<Stage>,
}

impl DeploymentPlan {
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name.to_string()).collect()
    }

    /// The standard single-host plan:
    /// validate → secrets → install → configure → migrate → services → health.
    pub fn standard(config: &DeployConfig) -> Self {
        Self::standard_with_ledger(config, Arc::new(Mutex::new(Vec::new())))
    }

    /// Build the standard plan around an explicit created-secrets ledger.
    /// The ledger is filled by the secrets stage and drained by its rollback;
    /// callers rolling back a crashed run seed it from the persisted
    /// `RunState` so the rollback scope survives the crash.
    pub fn standard_with_ledger(
        config: &DeployConfig,
        created_secrets: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        let stage_retry = config.stage_retry;
        let timeout = Duration::from_secs(config.stage_timeout_secs);
        let created_for_forward = Arc::clone(&created_secrets);

        let stages = vec![
            Stage {
                name: "validate",
                mutating: false,
                precondition: None,
                forward: Arc::new(|ctx: &StageContext| {
                    let reqs = validate::requirements_for(&ctx.config, &ctx.root);
                    let findings =
                        validate::validate(&reqs, &*ctx.manager, ctx.config.is_production());
                    for finding in &findings {
                        match finding.severity {
                            validate::Severity::Error => {
                                tracing::error!(check = %finding.check, "{}", finding.detail)
                            }
                            validate::Severity::Warning => {
                                tracing::warn!(check = %finding.check, "{}", finding.detail)
                            }
                        }
                    }
                    let blocking = findings
                        .iter()
                        .filter(|f| f.severity == validate::Severity::Error)
                        .count();
                    if blocking > 0 {
                        return Err(ShipwayError::ValidationFailed(blocking));
                    }
                    Ok(())
                }),
                rollback: None,
                retry: RetryPolicy::none(),
                timeout,
            },
            Stage {
                name: "secrets",
                mutating: true,
                precondition: Some(Box::new(|ctx: &StageContext| {
                    ctx.config
                        .secrets
                        .iter()
                        .all(|name| secrets::exists(&ctx.root, name))
                })),
                forward: Arc::new(move |ctx: &StageContext| {
                    for name in &ctx.config.secrets {
                        if !secrets::exists(&ctx.root, name) {
                            secrets::provision(&ctx.root, name, false)?;
                            created_for_forward.lock().unwrap().push(name.clone());
                        }
                    }
                    Ok(())
                }),
                rollback: Some(Arc::new(move |ctx: &StageContext| {
                    // Remove only the records this run created.
                    let created = created_secrets.lock().unwrap().clone();
                    for name in created {
                        secrets::remove(&ctx.root, &name)?;
                    }
                    Ok(())
                })),
                retry: RetryPolicy::none(),
                timeout,
            },
            Stage {
                name: "install",
                mutating: false,
                precondition: Some(Box::new(|ctx: &StageContext| match &ctx.config.install {
                    Some(install) => install::is_up_to_date(&ctx.root, install),
                    None => true,
                })),
                forward: Arc::new(|ctx: &StageContext| {
                    if let Some(install) = &ctx.config.install {
                        install::install(&ctx.root, install)?;
                    }
                    Ok(())
                }),
                rollback: None,
                retry: stage_retry,
                timeout,
            },
            Stage {
                name: "configure",
                mutating: true,
                precondition: Some(Box::new(configure_satisfied)),
                forward: Arc::new(|ctx: &StageContext| {
                    let mut lifecycle = LifecycleController::new(&*ctx.manager);
                    for target in &ctx.config.config_targets {
                        configure::render_and_install(&ctx.root, target)?;
                        // Reload only services that are already running; fresh
                        // units are started by the services stage.
                        if let Some(service) = &target.reload_service {
                            if ctx.manager.is_active(service)? {
                                lifecycle.reload(service)?;
                            }
                        }
                    }
                    Ok(())
                }),
                rollback: Some(Arc::new(|ctx: &StageContext| {
                    let mut lifecycle = LifecycleController::new(&*ctx.manager);
                    for target in ctx.config.config_targets.iter().rev() {
                        match configure::restore_previous(&ctx.root, target) {
                            Ok(()) => {}
                            // No previous generation: the file did not exist
                            // before this run, so remove it.
                            Err(ShipwayError::NoPreviousConfig(_)) => {
                                if target.destination.exists() {
                                    std::fs::remove_file(&target.destination)?;
                                }
                            }
                            Err(e) => return Err(e),
                        }
                        if let Some(service) = &target.reload_service {
                            if ctx.manager.is_active(service)? {
                                lifecycle.reload(service)?;
                            }
                        }
                    }
                    Ok(())
                })),
                retry: RetryPolicy::none(),
                timeout,
            },
            Stage {
                name: "migrate",
                mutating: true,
                precondition: Some(Box::new(|ctx: &StageContext| {
                    ctx.config.migration_command.is_empty()
                })),
                forward: Arc::new(|ctx: &StageContext| {
                    migrate::run_migrations(&ctx.root, &ctx.config.migration_command)?;
                    Ok(())
                }),
                // Migrations are assumed individually transactional; the
                // pipeline never rolls a schema back.
                rollback: None,
                retry: RetryPolicy::none(),
                timeout,
            },
            Stage {
                name: "services",
                mutating: true,
                precondition: Some(Box::new(|ctx: &StageContext| {
                    all_units_active(ctx).unwrap_or(false)
                })),
                forward: Arc::new(|ctx: &StageContext| {
                    let mut lifecycle = LifecycleController::new(&*ctx.manager);
                    lifecycle.start_all(&ctx.config.services)
                }),
                rollback: Some(Arc::new(|ctx: &StageContext| {
                    let mut lifecycle = LifecycleController::new(&*ctx.manager);
                    lifecycle.stop_all(&ctx.config.services)
                })),
                retry: stage_retry,
                timeout,
            },
            Stage {
                name: "health",
                mutating: false,
                precondition: Some(Box::new(|ctx: &StageContext| {
                    ctx.config.health.targets.is_empty()
                })),
                forward: Arc::new(|ctx: &StageContext| {
                    let report = health::check(&ctx.config.health)?;
                    match report.overall {
                        HealthStatus::Healthy => Ok(()),
                        HealthStatus::Degraded => {
                            tracing::warn!("deployment healthy with degraded components");
                            Ok(())
                        }
                        HealthStatus::Unhealthy => {
                            let failed: Vec<String> = report
                                .reports
                                .iter()
                                .filter(|r| r.status != HealthStatus::Healthy)
                                .map(|r| {
                                    format!(
                                        "{} ({})",
                                        r.name,
                                        r.error.as_deref().unwrap_or("degraded")
                                    )
                                })
                                .collect();
                            Err(ShipwayError::HealthCheckFailed(failed.join(", ")))
                        }
                    }
                }),
                rollback: None,
                // The verifier retries per target internally.
                retry: RetryPolicy::none(),
                timeout,
            },
        ];

        Self { stages }
    }
}

fn all_units_active(ctx: &StageContext) -> Result<bool> {
    for unit in &ctx.config.services {
        if !ctx.manager.is_active(&unit.name)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// True when every config target's destination already holds exactly what a
/// fresh render would produce.
fn configure_satisfied(ctx: &StageContext) -> bool {
    for target in &ctx.config.config_targets {
        let Ok(template) = std::fs::read_to_string(&target.template) else {
            return false;
        };
        let Ok(rendered) = configure::render(&template, &target.params) else {
            return false;
        };
        match std::fs::read_to_string(&target.destination) {
            Ok(current) if current == rendered => {}
            _ => return false,
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Pipeline execution
// ---------------------------------------------------------------------------

/// Operator-facing summary of one run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub environment: String,
    pub status: RunStatus,
    pub snapshot: Option<String>,
    pub outcomes: Vec<(String, StageOutcome)>,
    pub failed_stage: Option<String>,
    pub failure: Option<String>,
    pub rollback_failures: Vec<String>,
}

impl RunSummary {
    fn from_state(state: &RunState) -> Self {
        let outcomes = state
            .stage_names
            .iter()
            .cloned()
            .zip(state.outcomes.iter().cloned())
            .collect();
        Self {
            run_id: state.id.clone(),
            environment: state.environment.clone(),
            status: state.status,
            snapshot: state.snapshot.clone(),
            outcomes,
            failed_stage: None,
            failure: None,
            rollback_failures: Vec::new(),
        }
    }
}

/// Execute the standard plan against a host.
///
/// Holds the deployment lock for the whole run; a concurrent caller fails
/// with `DeploymentInProgress`. The `RunState` is persisted before every
/// stage so a crash leaves an inspectable, rollbackable record.
pub fn run(
    root: &Path,
    config: &DeployConfig,
    manager: Arc<dyn ServiceManager + Send + Sync>,
) -> Result<RunSummary> {
    let _lock = DeployLock::acquire(&config.lock_path(root))?;

    let ctx = StageContext {
        root: root.to_path_buf(),
        config: config.clone(),
        manager,
    };
    let ledger: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let plan = DeploymentPlan::standard_with_ledger(&ctx.config, Arc::clone(&ledger));
    let mut state = RunState::new(&ctx.config.environment, plan.stage_names());

    state.status = RunStatus::Running;
    state.save(&ctx.root)?;
    tracing::info!(run = %state.id, environment = %state.environment, "deployment started");

    let mut snapshot_taken = false;
    for (idx, stage) in plan.stages.iter().enumerate() {
        state.current_stage = idx;
        state.save(&ctx.root)?;

        if stage.already_satisfied(&ctx) {
            tracing::info!(stage = stage.name, "precondition satisfied, skipping");
            state.record_outcome(idx, StageOutcome::Skipped);
            state.save(&ctx.root)?;
            continue;
        }

        // Known-good snapshot, taken once validation has passed but before
        // anything mutates. A failed snapshot does not abort the deploy, but
        // the run then has no rollback target for data.
        if stage.mutating && !snapshot_taken {
            snapshot_taken = true;
            if let Some(backup_config) = &ctx.config.backup {
                match backup::snapshot_unlocked(&ctx.root, backup_config) {
                    Ok(artifact) => {
                        state.snapshot = Some(artifact.id);
                        state.save(&ctx.root)?;
                    }
                    Err(e) => tracing::warn!("pre-run snapshot failed: {e}"),
                }
            }
        }

        tracing::info!(stage = stage.name, "running stage");
        let result = execute_stage(stage, &ctx);
        state.created_secrets = ledger.lock().unwrap().clone();
        match result {
            Ok(()) => {
                state.record_outcome(idx, StageOutcome::Succeeded);
                state.save(&ctx.root)?;
            }
            Err(e) => {
                let message = e.to_string();
                state.record_outcome(idx, StageOutcome::Failed { message: message.clone() });
                state.save(&ctx.root)?;
                tracing::error!(stage = stage.name, "stage failed: {message}");
                return fail_run(&ctx, &plan, state, stage.name, message);
            }
        }
    }

    state.finish(RunStatus::Succeeded);
    state.save(&ctx.root)?;
    tracing::info!(run = %state.id, "deployment succeeded");
    Ok(RunSummary::from_state(&state))
}

/// Run a stage's forward action with its retry policy and timeout. The retry
/// policy applies only to the forward action; a timeout is never retried.
fn execute_stage(stage: &Stage, ctx: &StageContext) -> Result<()> {
    let attempts = stage.retry.max_attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match run_with_timeout(stage, ctx) {
            Ok(()) => return Ok(()),
            Err(e @ ShipwayError::StageTimeout { .. }) => return Err(e),
            Err(e) => {
                if attempt < attempts {
                    tracing::warn!(
                        stage = stage.name,
                        attempt,
                        "stage attempt failed, retrying: {e}"
                    );
                    std::thread::sleep(stage.retry.delay_for(attempt));
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| ShipwayError::StageFailed {
        stage: stage.name.to_string(),
        reason: "no attempts executed".to_string(),
    }))
}

fn run_with_timeout(stage: &Stage, ctx: &StageContext) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let forward = Arc::clone(&stage.forward);
    let thread_ctx = StageContext {
        root: ctx.root.clone(),
        config: ctx.config.clone(),
        manager: Arc::clone(&ctx.manager),
    };
    std::thread::spawn(move || {
        let _ = tx.send(forward(&thread_ctx));
    });
    match rx.recv_timeout(stage.timeout) {
        Ok(result) => result,
        // The worker thread is abandoned; there is no silent continuation
        // past a timeout.
        Err(_) => Err(ShipwayError::StageTimeout {
            stage: stage.name.to_string(),
            seconds: stage.timeout.as_secs(),
        }),
    }
}

fn fail_run(
    ctx: &StageContext,
    plan: &DeploymentPlan,
    mut state: RunState,
    failed_stage: &str,
    failure: String,
) -> Result<RunSummary> {
    // Validation and install failures before any mutating stage has executed
    // are recovered by simply not proceeding — nothing to roll back.
    let mutated = plan
        .stages
        .iter()
        .zip(&state.outcomes)
        .any(|(stage, outcome)| {
            stage.mutating
                && matches!(
                    outcome,
                    StageOutcome::Succeeded | StageOutcome::Failed { .. }
                )
        });

    if !mutated {
        state.finish(RunStatus::Failed);
        state.save(&ctx.root)?;
        let mut summary = RunSummary::from_state(&state);
        summary.failed_stage = Some(failed_stage.to_string());
        summary.failure = Some(failure);
        return Ok(summary);
    }

    let report = rollback::run(&plan.stages, &state, ctx);
    let status = if report.failures.is_empty() {
        RunStatus::RolledBack
    } else {
        RunStatus::RollbackFailed
    };
    state.finish(status);
    state.save(&ctx.root)?;

    let mut summary = RunSummary::from_state(&state);
    summary.failed_stage = Some(failed_stage.to_string());
    summary.failure = Some(failure);
    summary.rollback_failures = report.failures;
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Operator-driven rollback
// ---------------------------------------------------------------------------

/// Roll back a recorded run (the latest failed/interrupted one by default).
pub fn rollback_run(
    root: &Path,
    config: &DeployConfig,
    manager: Arc<dyn ServiceManager + Send + Sync>,
    run_id: Option<&str>,
) -> Result<RunSummary> {
    let _lock = DeployLock::acquire(&config.lock_path(root))?;

    let mut state = match run_id {
        Some(id) => RunState::load(root, id)?,
        None => RunState::list(root)?
            .into_iter()
            .rev()
            .find(|r| !matches!(r.status, RunStatus::Succeeded | RunStatus::RolledBack))
            .ok_or_else(|| ShipwayError::RunNotFound("no rollbackable run".to_string()))?,
    };

    let ctx = StageContext {
        root: root.to_path_buf(),
        config: config.clone(),
        manager,
    };
    // Seed the ledger from the persisted run so rollback removes exactly the
    // secrets that run created, even after a crash.
    let ledger = Arc::new(Mutex::new(state.created_secrets.clone()));
    let plan = DeploymentPlan::standard_with_ledger(&ctx.config, ledger);
    let report = rollback::run(&plan.stages, &state, &ctx);

    let status = if report.failures.is_empty() {
        RunStatus::RolledBack
    } else {
        RunStatus::RollbackFailed
    };
    state.finish(status);
    state.save(root)?;

    let mut summary = RunSummary::from_state(&state);
    summary.rollback_failures = report.failures;
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
