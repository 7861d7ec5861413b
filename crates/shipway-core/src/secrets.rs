//! File-based secret provisioning.
//!
//! Layout:
//!   .shipway/secrets/
//!     db-password            — secret value, mode 0600
//!     db-password.meta.yaml  — metadata sidecar (no value)
//!
//! Invariants: the secret file is written 0600 from the first byte (mode is set
//! on the tempfile before the atomic rename), an existing secret is reused
//! unless rotation is requested, and values never appear in logs, argument
//! lists, or serialized records — callers get a path handle and read the value
//! at the point of use.

use crate::error::{Result, ShipwayError};
use crate::io;
use crate::paths;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SECRET_MODE: u32 = 0o600;
const GENERATED_LEN: usize = 43;

/// Metadata for a provisioned secret. Never carries the value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRecord {
    pub name: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub rotated_at: Option<DateTime<Utc>>,
    pub mode: u32,
}

impl SecretRecord {
    /// Path handle for callers; the value is read only at the point of use.
    pub fn handle(&self) -> &Path {
        &self.path
    }
}

/// Generate a URL-safe random value from the OS entropy source.
pub fn generate_value() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(GENERATED_LEN)
        .map(char::from)
        .collect()
}

/// Provision a secret with the default generator.
pub fn provision(root: &Path, name: &str, rotate: bool) -> Result<SecretRecord> {
    provision_with(root, name, generate_value, rotate)
}

/// Provision a secret, reusing an existing record unless `rotate` is set.
///
/// New values are written to a 0600 tempfile in the secrets directory and
/// atomically renamed into place. Rotation preserves the original creation
/// timestamp and stamps `rotated_at`.
pub fn provision_with<F>(root: &Path, name: &str, generator: F, rotate: bool) -> Result<SecretRecord>
where
    F: FnOnce() -> String,
{
    paths::validate_name(name)?;
    let path = paths::secret_path(root, name);

    if path.exists() && !rotate {
        return load_record(root, name);
    }

    let previous = if path.exists() {
        load_record(root, name).ok()
    } else {
        None
    };

    io::ensure_dir(&paths::secrets_dir(root)).map_err(|e| ShipwayError::SecretWrite {
        name: name.to_string(),
        reason: e.to_string(),
    })?;

    let value = generator();
    io::atomic_write_with_mode(&path, value.as_bytes(), SECRET_MODE).map_err(|e| {
        ShipwayError::SecretWrite {
            name: name.to_string(),
            reason: e.to_string(),
        }
    })?;

    let now = Utc::now();
    let record = SecretRecord {
        name: name.to_string(),
        path,
        created_at: previous.as_ref().map(|p| p.created_at).unwrap_or(now),
        rotated_at: previous.as_ref().map(|_| now),
        mode: SECRET_MODE,
    };
    save_record(root, &record)?;
    tracing::info!(secret = name, rotated = rotate, "provisioned secret");
    Ok(record)
}

/// Read a secret's value into memory at the point of use.
pub fn peek(root: &Path, name: &str) -> Result<String> {
    let path = paths::secret_path(root, name);
    if !path.exists() {
        return Err(ShipwayError::SecretNotFound(name.to_string()));
    }
    Ok(std::fs::read_to_string(&path)?)
}

/// Remove a secret and its sidecar. Used by rollback for records created
/// during a failed run.
pub fn remove(root: &Path, name: &str) -> Result<()> {
    let path = paths::secret_path(root, name);
    if !path.exists() {
        return Err(ShipwayError::SecretNotFound(name.to_string()));
    }
    std::fs::remove_file(&path)?;
    let meta = paths::secret_meta_path(root, name);
    if meta.exists() {
        std::fs::remove_file(&meta)?;
    }
    Ok(())
}

pub fn exists(root: &Path, name: &str) -> bool {
    paths::secret_path(root, name).exists()
}

/// List records for all provisioned secrets, sorted by name.
pub fn list(root: &Path) -> Result<Vec<SecretRecord>> {
    let dir = paths::secrets_dir(root);
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut records = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if name_str.ends_with(".meta.yaml") || entry.path().is_dir() {
            continue;
        }
        records.push(load_record(root, &name_str)?);
    }
    records.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(records)
}

fn load_record(root: &Path, name: &str) -> Result<SecretRecord> {
    let meta_path = paths::secret_meta_path(root, name);
    if !meta_path.exists() {
        // Secret file without a sidecar (hand-placed) — reconstruct from the file.
        let path = paths::secret_path(root, name);
        let created_at = path
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);
        return Ok(SecretRecord {
            name: name.to_string(),
            path,
            created_at,
            rotated_at: None,
            mode: SECRET_MODE,
        });
    }
    let content = std::fs::read_to_string(&meta_path)?;
    Ok(serde_yaml::from_str(&content)?)
}

fn save_record(root: &Path, record: &SecretRecord) -> Result<()> {
    let path = paths::secret_meta_path(root, &record.name);
    let content = serde_yaml::to_string(record)?;
    io::atomic_write(&path, content.as_bytes())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn provision_creates_secret_with_owner_only_mode() {
        let dir = TempDir::new().unwrap();
        let record = provision(dir.path(), "db-password", false).unwrap();
        assert!(record.path.exists());
        assert_eq!(record.mode, 0o600);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = record.path.metadata().unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn provision_is_idempotent() {
        let dir = TempDir::new().unwrap();
        provision_with(dir.path(), "api-key", || "first".to_string(), false).unwrap();
        provision_with(dir.path(), "api-key", || "second".to_string(), false).unwrap();
        assert_eq!(peek(dir.path(), "api-key").unwrap(), "first");
    }

    #[test]
    fn rotate_replaces_value_and_keeps_creation_time() {
        let dir = TempDir::new().unwrap();
        let first = provision_with(dir.path(), "api-key", || "first".to_string(), false).unwrap();
        let rotated = provision_with(dir.path(), "api-key", || "second".to_string(), true).unwrap();
        assert_eq!(peek(dir.path(), "api-key").unwrap(), "second");
        assert_eq!(rotated.created_at, first.created_at);
        assert!(rotated.rotated_at.is_some());
    }

    #[test]
    fn generated_values_are_long_and_distinct() {
        let a = generate_value();
        let b = generate_value();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
    }

    #[test]
    fn record_serialization_never_contains_value() {
        let dir = TempDir::new().unwrap();
        let record =
            provision_with(dir.path(), "token", || "hunter2-value".to_string(), false).unwrap();
        let yaml = serde_yaml::to_string(&record).unwrap();
        assert!(!yaml.contains("hunter2-value"));
        let meta =
            std::fs::read_to_string(paths::secret_meta_path(dir.path(), "token")).unwrap();
        assert!(!meta.contains("hunter2-value"));
    }

    #[test]
    fn peek_missing_fails() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            peek(dir.path(), "nope"),
            Err(ShipwayError::SecretNotFound(_))
        ));
    }

    #[test]
    fn remove_deletes_secret_and_sidecar() {
        let dir = TempDir::new().unwrap();
        provision(dir.path(), "tmp-secret", false).unwrap();
        remove(dir.path(), "tmp-secret").unwrap();
        assert!(!exists(dir.path(), "tmp-secret"));
        assert!(!paths::secret_meta_path(dir.path(), "tmp-secret").exists());
    }

    #[test]
    fn list_skips_sidecars() {
        let dir = TempDir::new().unwrap();
        provision(dir.path(), "alpha", false).unwrap();
        provision(dir.path(), "beta", false).unwrap();
        let records = list(dir.path()).unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn invalid_name_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            provision(dir.path(), "Bad Name", false),
            Err(ShipwayError::InvalidName(_))
        ));
    }
}
