//! Dependency installation into an isolated runtime prefix.
//!
//! Packages land under `.shipway/runtime/` — never the host's global
//! environment — so re-install is safe and uninstall is directory removal.
//! A Sha256 digest of the manifest gates re-runs: unchanged manifest, no-op.

use crate::config::InstallConfig;
use crate::error::{Result, ShipwayError};
use crate::io;
use crate::paths;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    UpToDate,
}

/// Hex Sha256 of a file's contents.
pub fn file_digest(path: &Path) -> Result<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(format!("{:x}", hasher.finalize()))
}

fn recorded_digest(root: &Path) -> Option<String> {
    std::fs::read_to_string(paths::manifest_digest_path(root))
        .ok()
        .map(|s| s.trim().to_string())
}

/// True when the recorded digest matches the manifest on disk.
pub fn is_up_to_date(root: &Path, config: &InstallConfig) -> bool {
    match (recorded_digest(root), file_digest(&config.manifest)) {
        (Some(recorded), Ok(current)) => recorded == current,
        _ => false,
    }
}

/// Install dependencies per the manifest. Idempotent: a matching digest
/// record short-circuits to `UpToDate` without touching the prefix.
pub fn install(root: &Path, config: &InstallConfig) -> Result<InstallOutcome> {
    if !config.manifest.exists() {
        return Err(ShipwayError::Install(format!(
            "manifest not found: {}",
            config.manifest.display()
        )));
    }
    let digest = file_digest(&config.manifest)?;
    if recorded_digest(root).as_deref() == Some(digest.as_str()) {
        tracing::debug!("install manifest unchanged, skipping");
        return Ok(InstallOutcome::UpToDate);
    }

    let prefix = paths::runtime_dir(root).join("prefix");
    io::ensure_dir(&prefix)?;

    let program = config
        .command
        .first()
        .ok_or_else(|| ShipwayError::Install("install command is empty".to_string()))?;
    let output = Command::new(program)
        .args(&config.command[1..])
        .arg(&prefix)
        .output()
        .map_err(|e| ShipwayError::Install(format!("failed to spawn '{program}': {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ShipwayError::Install(tail(&stderr, 500)));
    }

    // Record the digest only after a successful install.
    io::atomic_write(&paths::manifest_digest_path(root), digest.as_bytes())?;
    tracing::info!(manifest = %config.manifest.display(), "dependencies installed");
    Ok(InstallOutcome::Installed)
}

/// Last `max` bytes of a message, on a char boundary.
fn tail(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - max;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
