//! Pre-flight environment validation.
//!
//! Every check is independent and non-mutating; the validator runs all of
//! them and returns every finding so the operator sees the full picture in
//! one pass instead of fixing problems one failure at a time.

use crate::config::DeployConfig;
use crate::service::ServiceManager;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Requirements and findings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Requirement {
    /// Executable resolvable on PATH.
    Executable { name: String },
    /// Filesystem path that must exist; optionally writable.
    PathExists { path: PathBuf, writable: bool },
    /// Environment variable set to a real (non-placeholder) value.
    EnvVar { name: String },
    /// Service already active on the host (e.g. the database engine).
    ServiceActive { name: String },
    /// Minimum free space on the filesystem holding `path`, in MiB.
    MinDiskMb { path: PathBuf, min_mb: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub check: String,
    pub severity: Severity,
    pub detail: String,
}

impl Finding {
    fn error(check: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            severity: Severity::Error,
            detail: detail.into(),
        }
    }

    fn warning(check: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            severity: Severity::Warning,
            detail: detail.into(),
        }
    }
}

/// True when any finding blocks the pipeline.
pub fn has_blocking(findings: &[Finding]) -> bool {
    findings.iter().any(|f| f.severity == Severity::Error)
}

// ---------------------------------------------------------------------------
// Requirement derivation
// ---------------------------------------------------------------------------

/// Build the requirement list for a deployment configuration rooted at `root`.
pub fn requirements_for(config: &DeployConfig, root: &Path) -> Vec<Requirement> {
    let mut reqs = Vec::new();

    for name in &config.required_executables {
        reqs.push(Requirement::Executable { name: name.clone() });
    }
    if let Some(min_mb) = config.min_disk_mb {
        reqs.push(Requirement::MinDiskMb {
            path: root.to_path_buf(),
            min_mb,
        });
    }
    // Commands the pipeline itself will invoke must resolve up front.
    for command in [&config.migration_command]
        .into_iter()
        .chain(config.config_targets.iter().map(|t| &t.validator))
    {
        if let Some(program) = command.first() {
            reqs.push(Requirement::Executable {
                name: program.clone(),
            });
        }
    }
    if let Some(install) = &config.install {
        if let Some(program) = install.command.first() {
            reqs.push(Requirement::Executable {
                name: program.clone(),
            });
        }
        reqs.push(Requirement::PathExists {
            path: install.manifest.clone(),
            writable: false,
        });
    }
    for target in &config.config_targets {
        reqs.push(Requirement::PathExists {
            path: target.template.clone(),
            writable: false,
        });
        if let Some(parent) = target.destination.parent() {
            reqs.push(Requirement::PathExists {
                path: parent.to_path_buf(),
                writable: true,
            });
        }
    }
    for unit in &config.services {
        reqs.push(Requirement::PathExists {
            path: unit.exec.clone(),
            writable: false,
        });
        // Dependencies outside the managed set must already be running.
        for dep in &unit.after {
            if !config.services.iter().any(|u| u.name == *dep) {
                reqs.push(Requirement::ServiceActive { name: dep.clone() });
            }
        }
    }
    for name in &config.required_env {
        reqs.push(Requirement::EnvVar { name: name.clone() });
    }

    reqs
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

const PLACEHOLDERS: &[&str] = &["changeme", "change_me", "todo", "fixme", "xxx", "placeholder"];

fn is_placeholder(value: &str) -> bool {
    let lowered = value.trim().to_lowercase();
    lowered.is_empty() || PLACEHOLDERS.iter().any(|p| lowered == *p)
}

/// Run every requirement check and return all findings.
///
/// In production, placeholder environment values are errors; elsewhere they
/// are warnings (a staging host may legitimately run with dummy credentials).
pub fn validate(
    requirements: &[Requirement],
    manager: &dyn ServiceManager,
    production: bool,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    for req in requirements {
        match req {
            Requirement::Executable { name } => {
                if which::which(name).is_err() {
                    findings.push(Finding::error(
                        format!("executable:{name}"),
                        format!("'{name}' not found on PATH"),
                    ));
                }
            }
            Requirement::PathExists { path, writable } => {
                if !path.exists() {
                    findings.push(Finding::error(
                        format!("path:{}", path.display()),
                        "path does not exist".to_string(),
                    ));
                } else if *writable && !is_writable(path) {
                    findings.push(Finding::error(
                        format!("path:{}", path.display()),
                        "path is not writable".to_string(),
                    ));
                }
            }
            Requirement::EnvVar { name } => match std::env::var(name) {
                Err(_) => {
                    findings.push(Finding::error(
                        format!("env:{name}"),
                        format!("environment variable '{name}' is not set"),
                    ));
                }
                Ok(value) if is_placeholder(&value) => {
                    let finding = if production {
                        Finding::error(
                            format!("env:{name}"),
                            format!("'{name}' holds a placeholder value"),
                        )
                    } else {
                        Finding::warning(
                            format!("env:{name}"),
                            format!("'{name}' holds a placeholder value"),
                        )
                    };
                    findings.push(finding);
                }
                Ok(_) => {}
            },
            Requirement::ServiceActive { name } => match manager.is_active(name) {
                Ok(true) => {}
                Ok(false) => {
                    findings.push(Finding::error(
                        format!("service:{name}"),
                        format!("service '{name}' is not active"),
                    ));
                }
                Err(e) => {
                    findings.push(Finding::error(
                        format!("service:{name}"),
                        format!("could not query service '{name}': {e}"),
                    ));
                }
            },
            Requirement::MinDiskMb { path, min_mb } => match available_disk_mb(path) {
                Some(free_mb) if free_mb < *min_mb => {
                    findings.push(Finding::error(
                        format!("disk:{}", path.display()),
                        format!("{free_mb} MiB free, {min_mb} MiB required"),
                    ));
                }
                Some(_) => {}
                None => {
                    findings.push(Finding::warning(
                        format!("disk:{}", path.display()),
                        "could not determine free space".to_string(),
                    ));
                }
            },
        }
    }

    findings
}

#[cfg(unix)]
fn available_disk_mb(path: &Path) -> Option<u64> {
    use std::os::unix::ffi::OsStrExt;
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) } != 0 {
        return None;
    }
    Some((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64) / (1024 * 1024))
}

#[cfg(not(unix))]
fn available_disk_mb(_path: &Path) -> Option<u64> {
    None
}

#[cfg(unix)]
fn is_writable(path: &std::path::Path) -> bool {
    let probe = path.join(".shipway-write-probe");
    match std::fs::File::create(&probe) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => !path.is_dir() && std::fs::OpenOptions::new().append(true).open(path).is_ok(),
    }
}

#[cfg(not(unix))]
fn is_writable(_path: &std::path::Path) -> bool {
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MockManager;
    use tempfile::TempDir;

    #[test]
    fn missing_executable_is_an_error() {
        let manager = MockManager::new();
        let reqs = vec![Requirement::Executable {
            name: "definitely-not-a-real-binary-xyz".to_string(),
        }];
        let findings = validate(&reqs, &manager, false);
        assert_eq!(findings.len(), 1);
        assert!(has_blocking(&findings));
    }

    #[test]
    fn present_executable_passes() {
        let manager = MockManager::new();
        let reqs = vec![Requirement::Executable {
            name: "sh".to_string(),
        }];
        let findings = validate(&reqs, &manager, false);
        assert!(findings.is_empty());
    }

    #[test]
    fn all_findings_reported_no_short_circuit() {
        let manager = MockManager::new();
        let reqs = vec![
            Requirement::Executable {
                name: "missing-binary-one".to_string(),
            },
            Requirement::Executable {
                name: "missing-binary-two".to_string(),
            },
            Requirement::PathExists {
                path: PathBuf::from("/definitely/not/here"),
                writable: false,
            },
        ];
        let findings = validate(&reqs, &manager, false);
        assert_eq!(findings.len(), 3);
    }

    #[test]
    fn placeholder_env_warns_outside_production() {
        std::env::set_var("SHIPWAY_TEST_PLACEHOLDER", "changeme");
        let manager = MockManager::new();
        let reqs = vec![Requirement::EnvVar {
            name: "SHIPWAY_TEST_PLACEHOLDER".to_string(),
        }];
        let findings = validate(&reqs, &manager, false);
        assert_eq!(findings[0].severity, Severity::Warning);

        let findings = validate(&reqs, &manager, true);
        assert_eq!(findings[0].severity, Severity::Error);
        std::env::remove_var("SHIPWAY_TEST_PLACEHOLDER");
    }

    #[test]
    fn inactive_service_is_an_error() {
        let manager = MockManager::new();
        let reqs = vec![Requirement::ServiceActive {
            name: "postgresql".to_string(),
        }];
        let findings = validate(&reqs, &manager, false);
        assert!(has_blocking(&findings));
    }

    #[test]
    fn writable_dir_passes() {
        let dir = TempDir::new().unwrap();
        let manager = MockManager::new();
        let reqs = vec![Requirement::PathExists {
            path: dir.path().to_path_buf(),
            writable: true,
        }];
        assert!(validate(&reqs, &manager, false).is_empty());
    }

    #[test]
    fn ample_disk_space_passes() {
        let dir = TempDir::new().unwrap();
        let manager = MockManager::new();
        let reqs = vec![Requirement::MinDiskMb {
            path: dir.path().to_path_buf(),
            min_mb: 1,
        }];
        assert!(validate(&reqs, &manager, false).is_empty());
    }

    #[test]
    fn insufficient_disk_space_is_an_error() {
        let dir = TempDir::new().unwrap();
        let manager = MockManager::new();
        // No filesystem has this much headroom.
        let reqs = vec![Requirement::MinDiskMb {
            path: dir.path().to_path_buf(),
            min_mb: u64::MAX / (1024 * 1024),
        }];
        let findings = validate(&reqs, &manager, false);
        assert!(has_blocking(&findings));
        assert!(findings[0].check.starts_with("disk:"));
    }

    #[test]
    fn min_disk_requirement_derived_from_config() {
        let yaml = "environment: staging\nmin_disk_mb: 512\n";
        let config: DeployConfig = serde_yaml::from_str(yaml).unwrap();
        let reqs = requirements_for(&config, Path::new("/srv/app"));
        assert!(reqs.iter().any(|r| matches!(
            r,
            Requirement::MinDiskMb { min_mb: 512, .. }
        )));
    }

    #[test]
    fn requirements_derived_from_config() {
        let yaml = r#"
environment: staging
required_executables: [curl]
migration_command: [alembic, upgrade, head]
services:
  - name: web
    exec: /usr/bin/web
    after: [postgresql]
"#;
        let config: DeployConfig = serde_yaml::from_str(yaml).unwrap();
        let reqs = requirements_for(&config, Path::new("/srv/app"));
        assert!(reqs.iter().any(
            |r| matches!(r, Requirement::Executable { name } if name == "curl")
        ));
        assert!(reqs.iter().any(
            |r| matches!(r, Requirement::Executable { name } if name == "alembic")
        ));
        // postgresql is not a managed unit, so it must already be active.
        assert!(reqs.iter().any(
            |r| matches!(r, Requirement::ServiceActive { name } if name == "postgresql")
        ));
    }
}
