use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShipwayError {
    #[error("not initialized: run 'shipway init'")]
    NotInitialized,

    #[error("environment validation failed: {0} blocking finding(s)")]
    ValidationFailed(usize),

    #[error("invalid name '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidName(String),

    #[error("secret not found: {0}")]
    SecretNotFound(String),

    #[error("failed to write secret '{name}': {reason}")]
    SecretWrite { name: String, reason: String },

    #[error("dependency install failed: {0}")]
    Install(String),

    #[error("migration tool exited with status {status}: {detail}")]
    Migration { status: i32, detail: String },

    #[error("configuration error for '{target}': {reason}")]
    Configuration { target: String, reason: String },

    #[error("no previous configuration artifact for '{0}'")]
    NoPreviousConfig(String),

    #[error("service '{unit}' cannot start: dependency '{dependency}' is {state}")]
    DependencyUnavailable {
        unit: String,
        dependency: String,
        state: String,
    },

    #[error("service manager failed for '{unit}': {reason}")]
    ServiceControl { unit: String, reason: String },

    #[error("invalid transition for '{unit}' from {from} to {to}")]
    InvalidTransition {
        unit: String,
        from: String,
        to: String,
    },

    #[error("health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("backup verification failed for '{id}': {reason}")]
    BackupVerification { id: String, reason: String },

    #[error("backup not found: {0}")]
    BackupNotFound(String),

    #[error("backup '{0}' is referenced by an in-progress restore")]
    BackupInUse(String),

    #[error("services must be stopped before restore; still active: {0}")]
    ServicesStillActive(String),

    #[error("rollback partially failed ({} of {total} actions): operator intervention required", failures.len())]
    RollbackPartialFailure {
        total: usize,
        failures: Vec<String>,
    },

    #[error("another deployment is in progress (lock held by pid {pid})")]
    DeploymentInProgress { pid: u32 },

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("stage '{stage}' exceeded its timeout of {seconds}s")]
    StageTimeout { stage: String, seconds: u64 },

    #[error("stage '{stage}' failed: {reason}")]
    StageFailed { stage: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ShipwayError>;
