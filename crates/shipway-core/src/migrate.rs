//! Schema migration invocation.
//!
//! The migration tool is opaque: exit 0 is the only success signal, any
//! non-zero exit is fatal for the run. Migrations are assumed individually
//! transactional — the pipeline never attempts to roll a schema back.

use crate::error::{Result, ShipwayError};
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub output: String,
}

/// Run the configured migration command from the project root.
pub fn run_migrations(root: &Path, command: &[String]) -> Result<MigrationReport> {
    let program = command.first().ok_or_else(|| ShipwayError::Migration {
        status: -1,
        detail: "migration command is empty".to_string(),
    })?;

    let output = Command::new(program)
        .args(&command[1..])
        .current_dir(root)
        .output()
        .map_err(|e| ShipwayError::Migration {
            status: -1,
            detail: format!("failed to spawn '{program}': {e}"),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let source = if stderr.trim().is_empty() {
            stdout.trim()
        } else {
            stderr.trim()
        };
        return Err(ShipwayError::Migration {
            status: output.status.code().unwrap_or(-1),
            detail: tail(source, 500),
        });
    }

    tracing::info!("migrations applied");
    Ok(MigrationReport { output: stdout })
}

/// Last `max` bytes of a message, on a char boundary.
fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}
