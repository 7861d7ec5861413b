use crate::error::{Result, ShipwayError};
use crate::io;
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    RolledBack,
    RollbackFailed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::RolledBack => "rolled_back",
            RunStatus::RollbackFailed => "rollback_failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StageOutcome {
    Pending,
    Skipped,
    Succeeded,
    Failed { message: String },
}

impl std::fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Skipped => write!(f, "skipped"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed { message } => write!(f, "failed: {message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Persisted record of one deployment attempt. Saved before every stage so a
/// crashed run can be inspected and rolled back instead of restarted blindly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub id: String,
    pub environment: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub stage_names: Vec<String>,
    pub current_stage: usize,
    pub outcomes: Vec<StageOutcome>,
    /// Pre-run snapshot — the rollback target. Retained until rollback is
    /// confirmed successful.
    #[serde(default)]
    pub snapshot: Option<String>,
    /// Secret names provisioned by this run. Rollback of a crashed run reads
    /// this to remove exactly what the run created and nothing older.
    #[serde(default)]
    pub created_secrets: Vec<String>,
}

impl RunState {
    pub fn new(environment: &str, stage_names: Vec<String>) -> Self {
        let outcomes = vec![StageOutcome::Pending; stage_names.len()];
        Self {
            id: short_run_id(),
            environment: environment.to_string(),
            status: RunStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            stage_names,
            current_stage: 0,
            outcomes,
            snapshot: None,
            created_secrets: Vec::new(),
        }
    }

    pub fn load(root: &Path, id: &str) -> Result<Self> {
        let path = paths::run_state_path(root, id);
        if !path.exists() {
            return Err(ShipwayError::RunNotFound(id.to_string()));
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::run_state_path(root, &self.id);
        let content = serde_yaml::to_string(self)?;
        io::atomic_write(&path, content.as_bytes())
    }

    /// Most recent run by start time, if any.
    pub fn latest(root: &Path) -> Result<Option<Self>> {
        Ok(Self::list(root)?.into_iter().last())
    }

    /// All recorded runs, oldest first.
    pub fn list(root: &Path) -> Result<Vec<Self>> {
        let dir = paths::state_dir(root);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(id) = name_str.strip_suffix(".yaml") {
                runs.push(Self::load(root, id)?);
            }
        }
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }

    pub fn record_outcome(&mut self, stage: usize, outcome: StageOutcome) {
        if stage < self.outcomes.len() {
            self.outcomes[stage] = outcome;
        }
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

fn short_run_id() -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{stamp}-{}", &uuid[..8])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
