//! Timestamped, checksummed snapshots with class-based retention.
//!
//! A snapshot is the stdout of the configured dump command, written to the
//! backup store with a Sha256 checksum and a metadata sidecar. The snapshot
//! is not complete until the persisted artifact re-verifies against the
//! checksum; a mismatch discards the partial artifact.

use crate::config::{BackupConfig, RetentionConfig};
use crate::error::{Result, ShipwayError};
use crate::io;
use crate::lock::DeployLock;
use crate::paths;
use crate::service::{LifecycleController, ServiceUnit};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

// ---------------------------------------------------------------------------
// Retention classes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionClass {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RetentionClass {
    pub fn window_days(&self, policy: &RetentionConfig) -> i64 {
        match self {
            RetentionClass::Daily => policy.daily_days,
            RetentionClass::Weekly => policy.weekly_days,
            RetentionClass::Monthly => policy.monthly_days,
            RetentionClass::Yearly => policy.yearly_days,
        }
    }
}

impl std::fmt::Display for RetentionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RetentionClass::Daily => "daily",
            RetentionClass::Weekly => "weekly",
            RetentionClass::Monthly => "monthly",
            RetentionClass::Yearly => "yearly",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// BackupArtifact
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
    pub checksum: String,
    pub class: RetentionClass,
    pub size: u64,
    /// Set while a restore reads this artifact; pruning skips it.
    #[serde(default)]
    pub restore_in_progress: bool,
}

pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// List all artifacts, oldest first.
pub fn list(root: &Path) -> Result<Vec<BackupArtifact>> {
    let dir = paths::backups_dir(root);
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut artifacts = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if let Some(id) = name_str.strip_suffix(".meta.yaml") {
            artifacts.push(load(root, id)?);
        }
    }
    artifacts.sort_by_key(|a| a.created_at);
    Ok(artifacts)
}

pub fn load(root: &Path, id: &str) -> Result<BackupArtifact> {
    let meta_path = paths::backup_meta_path(root, id);
    if !meta_path.exists() {
        return Err(ShipwayError::BackupNotFound(id.to_string()));
    }
    let content = std::fs::read_to_string(&meta_path)?;
    Ok(serde_yaml::from_str(&content)?)
}

fn save_meta(root: &Path, artifact: &BackupArtifact) -> Result<()> {
    let path = paths::backup_meta_path(root, &artifact.id);
    let content = serde_yaml::to_string(artifact)?;
    io::atomic_write(&path, content.as_bytes())
}

/// Class for a new snapshot: first of its calendar year is yearly, of its
/// month monthly, of its ISO week weekly, else daily. Decided at creation,
/// never retroactively.
fn assign_class(created_at: DateTime<Utc>, existing: &[BackupArtifact]) -> RetentionClass {
    let same_year = existing.iter().any(|a| a.created_at.year() == created_at.year());
    if !same_year {
        return RetentionClass::Yearly;
    }
    let same_month = existing.iter().any(|a| {
        a.created_at.year() == created_at.year() && a.created_at.month() == created_at.month()
    });
    if !same_month {
        return RetentionClass::Monthly;
    }
    let week = created_at.iso_week();
    let same_week = existing.iter().any(|a| a.created_at.iso_week() == week);
    if !same_week {
        return RetentionClass::Weekly;
    }
    RetentionClass::Daily
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Produce a snapshot artifact. Snapshots share the deployment lock, so one
/// cannot interleave with a running deploy. Fails with `BackupVerification`
/// if the dump command fails or the persisted artifact does not match its
/// checksum; no partial artifact survives a failure.
pub fn snapshot(root: &Path, config: &BackupConfig, lock: &Path) -> Result<BackupArtifact> {
    let _lock = DeployLock::acquire(lock)?;
    snapshot_unlocked(root, config)
}

/// Snapshot body for callers that already hold the deployment lock.
pub(crate) fn snapshot_unlocked(root: &Path, config: &BackupConfig) -> Result<BackupArtifact> {
    let created_at = Utc::now();
    let attempt_id = created_at.format("%Y%m%dT%H%M%S").to_string();

    let program = config.dump_command.first().ok_or_else(|| {
        ShipwayError::BackupVerification {
            id: attempt_id.clone(),
            reason: "dump command is empty".to_string(),
        }
    })?;
    let output = Command::new(program)
        .args(&config.dump_command[1..])
        .current_dir(root)
        .output()
        .map_err(|e| ShipwayError::BackupVerification {
            id: attempt_id.clone(),
            reason: format!("failed to spawn '{program}': {e}"),
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ShipwayError::BackupVerification {
            id: attempt_id,
            reason: format!("dump command failed: {}", stderr.trim()),
        });
    }

    let checksum = checksum_bytes(&output.stdout);
    let id = format!("{attempt_id}-{}", &checksum[..8]);
    let path = paths::backup_artifact_path(root, &id);
    io::ensure_dir(&paths::backups_dir(root))?;
    io::atomic_write(&path, &output.stdout)?;

    // Verify what actually landed on disk before declaring the snapshot complete.
    let persisted = std::fs::read(&path)?;
    if checksum_bytes(&persisted) != checksum {
        let _ = std::fs::remove_file(&path);
        return Err(ShipwayError::BackupVerification {
            id,
            reason: "persisted artifact does not match checksum".to_string(),
        });
    }

    let artifact = BackupArtifact {
        class: assign_class(created_at, &list(root)?),
        id,
        created_at,
        size: persisted.len() as u64,
        path,
        checksum,
        restore_in_progress: false,
    };
    save_meta(root, &artifact)?;
    tracing::info!(id = %artifact.id, class = ?artifact.class, size = artifact.size, "snapshot complete");
    Ok(artifact)
}

// ---------------------------------------------------------------------------
// Restore
// ---------------------------------------------------------------------------

/// Restore state from an artifact. Holds the deployment lock for the whole
/// restore, so it cannot interleave with a deploy. Managed services are
/// stopped first via the lifecycle controller; the artifact is
/// checksum-verified before its bytes are fed to the restore command, and
/// marked in-progress so pruning cannot remove it mid-restore.
pub fn restore(
    root: &Path,
    config: &BackupConfig,
    id: &str,
    lock: &Path,
    lifecycle: &mut LifecycleController<'_>,
    units: &[ServiceUnit],
) -> Result<()> {
    let _lock = DeployLock::acquire(lock)?;
    let mut artifact = load(root, id)?;
    if artifact.restore_in_progress {
        return Err(ShipwayError::BackupInUse(id.to_string()));
    }

    lifecycle.stop_all(units)?;
    let still_active = lifecycle.active_units(units)?;
    if !still_active.is_empty() {
        return Err(ShipwayError::ServicesStillActive(still_active.join(", ")));
    }

    let data = std::fs::read(&artifact.path)?;
    if checksum_bytes(&data) != artifact.checksum {
        return Err(ShipwayError::BackupVerification {
            id: id.to_string(),
            reason: "artifact does not match recorded checksum".to_string(),
        });
    }

    artifact.restore_in_progress = true;
    save_meta(root, &artifact)?;

    let result = run_restore_command(root, config, id, &data);

    // Clear the in-progress marker whether or not the restore succeeded.
    artifact.restore_in_progress = false;
    save_meta(root, &artifact)?;
    result?;

    // Re-verify: the artifact on disk must still match after the restore read it.
    let data = std::fs::read(&artifact.path)?;
    if checksum_bytes(&data) != artifact.checksum {
        return Err(ShipwayError::BackupVerification {
            id: id.to_string(),
            reason: "artifact changed during restore".to_string(),
        });
    }

    tracing::info!(id, "restore complete");
    Ok(())
}

fn run_restore_command(root: &Path, config: &BackupConfig, id: &str, data: &[u8]) -> Result<()> {
    let program = config.restore_command.first().ok_or_else(|| {
        ShipwayError::BackupVerification {
            id: id.to_string(),
            reason: "restore command is empty".to_string(),
        }
    })?;
    let mut child = Command::new(program)
        .args(&config.restore_command[1..])
        .current_dir(root)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ShipwayError::BackupVerification {
            id: id.to_string(),
            reason: format!("failed to spawn '{program}': {e}"),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(data)
            .map_err(|e| ShipwayError::BackupVerification {
                id: id.to_string(),
                reason: format!("failed to feed artifact: {e}"),
            })?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| ShipwayError::BackupVerification {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ShipwayError::BackupVerification {
            id: id.to_string(),
            reason: format!("restore command failed: {}", stderr.trim()),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Prune
// ---------------------------------------------------------------------------

/// Remove artifacts whose retention window has elapsed, under the deployment
/// lock. The newest artifact of each class is always kept, an in-progress
/// restore target is never removed, and nothing younger than its class window
/// is touched. Returns the removed ids.
pub fn prune(root: &Path, policy: &RetentionConfig, lock: &Path) -> Result<Vec<String>> {
    let _lock = DeployLock::acquire(lock)?;
    prune_at(root, policy, Utc::now())
}

fn prune_at(root: &Path, policy: &RetentionConfig, now: DateTime<Utc>) -> Result<Vec<String>> {
    let artifacts = list(root)?;
    let mut removed = Vec::new();

    for artifact in &artifacts {
        let age_days = (now - artifact.created_at).num_days();
        if age_days <= artifact.class.window_days(policy) {
            continue;
        }
        if artifact.restore_in_progress {
            tracing::warn!(id = %artifact.id, "skipping prune of in-progress restore target");
            continue;
        }
        // Floor: never prune the newest artifact of a class.
        let newest_of_class = artifacts
            .iter()
            .filter(|a| a.class == artifact.class)
            .max_by_key(|a| a.created_at)
            .map(|a| a.id.clone());
        if newest_of_class.as_deref() == Some(artifact.id.as_str()) {
            continue;
        }

        if artifact.path.exists() {
            std::fs::remove_file(&artifact.path)?;
        }
        std::fs::remove_file(paths::backup_meta_path(root, &artifact.id))?;
        tracing::info!(id = %artifact.id, age_days, "pruned backup");
        removed.push(artifact.id.clone());
    }

    Ok(removed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
