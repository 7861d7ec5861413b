use crate::error::{Result, ShipwayError};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const SHIPWAY_DIR: &str = ".shipway";
pub const STATE_DIR: &str = ".shipway/state";
pub const SECRETS_DIR: &str = ".shipway/secrets";
pub const BACKUPS_DIR: &str = ".shipway/backups";
pub const RUNTIME_DIR: &str = ".shipway/runtime";
pub const PREV_DIR: &str = ".shipway/prev";

pub const CONFIG_FILE: &str = ".shipway/config.yaml";
pub const LOCK_FILE: &str = ".shipway/deploy.lock";
pub const MANIFEST_DIGEST_FILE: &str = ".shipway/runtime/manifest.digest";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn shipway_dir(root: &Path) -> PathBuf {
    root.join(SHIPWAY_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

pub fn run_state_path(root: &Path, run_id: &str) -> PathBuf {
    state_dir(root).join(format!("{run_id}.yaml"))
}

pub fn secrets_dir(root: &Path) -> PathBuf {
    root.join(SECRETS_DIR)
}

pub fn secret_path(root: &Path, name: &str) -> PathBuf {
    secrets_dir(root).join(name)
}

pub fn secret_meta_path(root: &Path, name: &str) -> PathBuf {
    secrets_dir(root).join(format!("{name}.meta.yaml"))
}

pub fn backups_dir(root: &Path) -> PathBuf {
    root.join(BACKUPS_DIR)
}

pub fn backup_artifact_path(root: &Path, id: &str) -> PathBuf {
    backups_dir(root).join(format!("{id}.dump"))
}

pub fn backup_meta_path(root: &Path, id: &str) -> PathBuf {
    backups_dir(root).join(format!("{id}.meta.yaml"))
}

pub fn runtime_dir(root: &Path) -> PathBuf {
    root.join(RUNTIME_DIR)
}

pub fn manifest_digest_path(root: &Path) -> PathBuf {
    root.join(MANIFEST_DIGEST_FILE)
}

pub fn prev_dir(root: &Path) -> PathBuf {
    root.join(PREV_DIR)
}

/// Previous-generation slot for a config destination. Keyed by a digest of
/// the full destination path, so two targets sharing a basename never
/// overwrite each other's backup.
pub fn prev_config_path(root: &Path, target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
    let digest = Sha256::digest(target.to_string_lossy().as_bytes());
    let prefix = format!("{:x}", digest);
    prev_dir(root).join(format!("{}-{name}", &prefix[..12]))
}

pub fn lock_path(root: &Path) -> PathBuf {
    root.join(LOCK_FILE)
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-_]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

/// Validate a logical name (secret, service unit, backup id prefix).
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 || !name_re().is_match(name) {
        return Err(ShipwayError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
