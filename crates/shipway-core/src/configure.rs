//! Declarative configuration rendering with atomic swap.
//!
//! Two-phase install: render the template to a tempfile, run the target's own
//! syntax validator against it, then save the active file as a
//! single-generation backup and rename the candidate over it. The active file
//! is never edited in place, so a crash mid-install cannot leave a
//! half-written configuration serving traffic.

use crate::config::ConfigTarget;
use crate::error::{Result, ShipwayError};
use crate::io;
use crate::paths;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use tempfile::NamedTempFile;

#[derive(Debug, Clone)]
pub struct ConfigOutcome {
    pub target: String,
    /// False when no validator was configured — installed unverified.
    pub verified: bool,
    /// True when a previous-generation artifact was saved for rollback.
    pub previous_saved: bool,
}

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_\-\.]+)\s*\}\}").unwrap())
}

/// Substitute `{{key}}` placeholders. Unresolved keys are an error — a
/// configuration with a literal placeholder must never reach the host.
pub fn render(template: &str, params: &HashMap<String, String>) -> Result<String> {
    let mut missing = Vec::new();
    let rendered = placeholder_re().replace_all(template, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        match params.get(key) {
            Some(value) => value.clone(),
            None => {
                missing.push(key.to_string());
                String::new()
            }
        }
    });
    if !missing.is_empty() {
        return Err(ShipwayError::Configuration {
            target: "template".to_string(),
            reason: format!("unresolved placeholders: {}", missing.join(", ")),
        });
    }
    Ok(rendered.into_owned())
}

/// Render, validate, and atomically install a configuration target.
pub fn render_and_install(root: &Path, target: &ConfigTarget) -> Result<ConfigOutcome> {
    let template = std::fs::read_to_string(&target.template).map_err(|e| {
        ShipwayError::Configuration {
            target: target.name.clone(),
            reason: format!("cannot read template {}: {e}", target.template.display()),
        }
    })?;
    let rendered = render(&template, &target.params).map_err(|e| match e {
        ShipwayError::Configuration { reason, .. } => ShipwayError::Configuration {
            target: target.name.clone(),
            reason,
        },
        other => other,
    })?;

    // Phase 1: candidate tempfile in the destination directory (same device,
    // so the final rename is atomic).
    let dest_dir = target.destination.parent().unwrap_or(Path::new("."));
    io::ensure_dir(dest_dir)?;
    let candidate = NamedTempFile::new_in(dest_dir)?;
    std::fs::write(candidate.path(), rendered.as_bytes())?;

    let verified = if target.validator.is_empty() {
        tracing::warn!(target = %target.name, "no validator configured, installing unverified");
        false
    } else {
        run_validator(&target.validator, candidate.path(), &target.name)?;
        true
    };

    // Phase 2: save the previous generation, then swap.
    let previous_saved = if target.destination.exists() {
        let prev = paths::prev_config_path(root, &target.destination);
        io::ensure_dir(&paths::prev_dir(root))?;
        std::fs::copy(&target.destination, &prev)?;
        true
    } else {
        false
    };

    candidate
        .persist(&target.destination)
        .map_err(|e| ShipwayError::Configuration {
            target: target.name.clone(),
            reason: format!("atomic rename failed: {}", e.error),
        })?;

    tracing::info!(target = %target.name, verified, "configuration installed");
    Ok(ConfigOutcome {
        target: target.name.clone(),
        verified,
        previous_saved,
    })
}

/// Re-install the single-generation previous artifact. Rollback path.
pub fn restore_previous(root: &Path, target: &ConfigTarget) -> Result<()> {
    let prev = paths::prev_config_path(root, &target.destination);
    if !prev.exists() {
        return Err(ShipwayError::NoPreviousConfig(target.name.clone()));
    }
    let data = std::fs::read(&prev)?;
    io::atomic_write(&target.destination, &data)?;
    tracing::info!(target = %target.name, "previous configuration restored");
    Ok(())
}

fn run_validator(validator: &[String], candidate: &Path, target: &str) -> Result<()> {
    let program = &validator[0];
    let output = Command::new(program)
        .args(&validator[1..])
        .arg(candidate)
        .output()
        .map_err(|e| ShipwayError::Configuration {
            target: target.to_string(),
            reason: format!("validator '{program}' failed to run: {e}"),
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ShipwayError::Configuration {
            target: target.to_string(),
            reason: format!("syntax validation failed: {}", stderr.trim()),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
