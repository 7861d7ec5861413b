//! Host-wide deployment lock.
//!
//! A `create_new` lock file guarantees at most one pipeline run (or
//! backup/restore) mutates the host at a time. The second caller fails
//! immediately with `DeploymentInProgress` instead of queueing. A lock whose
//! recorded pid no longer exists is stale and reclaimed, so a crashed run
//! does not wedge the host.

use crate::error::{Result, ShipwayError};
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct DeployLock {
    path: PathBuf,
}

impl DeployLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match Self::try_create(path) {
            Ok(lock) => Ok(lock),
            Err(ShipwayError::DeploymentInProgress { pid }) if !pid_alive(pid) => {
                tracing::warn!(pid, "reclaiming stale deployment lock");
                std::fs::remove_file(path)?;
                Self::try_create(path)
            }
            Err(e) => Err(e),
        }
    }

    fn try_create(path: &Path) -> Result<Self> {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(mut file) => {
                writeln!(file, "pid: {}", std::process::id())?;
                writeln!(file, "acquired_at: {}", Utc::now().to_rfc3339())?;
                Ok(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(ShipwayError::DeploymentInProgress {
                    pid: read_holder_pid(path).unwrap_or(0),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_holder_pid(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    content
        .lines()
        .find_map(|l| l.strip_prefix("pid: "))
        .and_then(|p| p.trim().parse().ok())
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    pid != 0 && Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_alive(pid: u32) -> bool {
    // Without /proc, assume the holder is alive rather than steal its lock.
    pid != 0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn acquire_creates_lock_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.lock");
        let _lock = DeployLock::acquire(&path).unwrap();
        assert!(path.exists());
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains(&format!("pid: {}", std::process::id())));
    }

    #[test]
    fn second_acquire_fails_with_in_progress() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.lock");
        let _lock = DeployLock::acquire(&path).unwrap();
        let result = DeployLock::acquire(&path);
        assert!(matches!(
            result,
            Err(ShipwayError::DeploymentInProgress { .. })
        ));
    }

    #[test]
    fn released_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.lock");
        {
            let _lock = DeployLock::acquire(&path).unwrap();
        }
        assert!(!path.exists());
        let _lock = DeployLock::acquire(&path).unwrap();
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.lock");
        // A pid that cannot be running (pid_max on Linux is < 2^22 by default,
        // and u32::MAX is far above any real pid).
        std::fs::write(&path, format!("pid: {}\n", u32::MAX)).unwrap();
        let lock = DeployLock::acquire(&path);
        assert!(lock.is_ok());
    }
}
