use crate::error::{Result, ShipwayError};
use crate::paths;
use crate::retry::RetryPolicy;
use crate::service::ServiceUnit;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Section configs
// ---------------------------------------------------------------------------

/// A rendered configuration target: template in, validated artifact out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigTarget {
    /// Logical name (e.g. "proxy", "app-unit").
    pub name: String,
    /// Template file with `{{key}}` placeholders.
    pub template: PathBuf,
    /// Active file the rendered artifact is swapped over.
    pub destination: PathBuf,
    /// Substitution parameters. Secret values are referenced by path, never inlined.
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Syntax validator invoked against the rendered tempfile (e.g. `nginx -t -c`).
    /// The candidate path is appended as the last argument.
    #[serde(default)]
    pub validator: Vec<String>,
    /// Service to reload after a successful swap.
    #[serde(default)]
    pub reload_service: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Dependency manifest (lockfile-style); its digest gates re-install.
    pub manifest: PathBuf,
    /// Install command; the isolated prefix directory is appended as the last argument.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthTargetConfig {
    pub name: String,
    pub url: String,
    /// Required targets force the aggregate to unhealthy when they fail.
    #[serde(default = "default_true")]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default)]
    pub targets: Vec<HealthTargetConfig>,
    #[serde(default = "default_health_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_concurrency_cap")]
    pub concurrency_cap: usize,
    /// Latency above this marks an otherwise-healthy target degraded.
    #[serde(default = "default_degraded_ms")]
    pub degraded_threshold_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            timeout_ms: default_health_timeout_ms(),
            retry: RetryPolicy::default(),
            concurrency_cap: default_concurrency_cap(),
            degraded_threshold_ms: default_degraded_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_daily_days")]
    pub daily_days: i64,
    #[serde(default = "default_weekly_days")]
    pub weekly_days: i64,
    #[serde(default = "default_monthly_days")]
    pub monthly_days: i64,
    #[serde(default = "default_yearly_days")]
    pub yearly_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            daily_days: default_daily_days(),
            weekly_days: default_weekly_days(),
            monthly_days: default_monthly_days(),
            yearly_days: default_yearly_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Command whose stdout is the snapshot content (e.g. `pg_dump`).
    pub dump_command: Vec<String>,
    /// Command fed the artifact on stdin to restore state (e.g. `psql`).
    pub restore_command: Vec<String>,
    #[serde(default)]
    pub retention: RetentionConfig,
}

// ---------------------------------------------------------------------------
// DeployConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Target environment name; "production" tightens validation.
    pub environment: String,

    /// Secrets provisioned before configuration renders.
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Executables that must be on PATH before any mutation.
    #[serde(default)]
    pub required_executables: Vec<String>,

    /// Environment variables that must be set to non-placeholder values.
    #[serde(default)]
    pub required_env: Vec<String>,

    /// Free space required on the deployment root's filesystem, in MiB.
    #[serde(default)]
    pub min_disk_mb: Option<u64>,

    #[serde(default)]
    pub install: Option<InstallConfig>,

    /// Migration tool invocation; exit 0 is the only success signal.
    #[serde(default)]
    pub migration_command: Vec<String>,

    #[serde(default)]
    pub config_targets: Vec<ConfigTarget>,

    #[serde(default)]
    pub services: Vec<ServiceUnit>,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub backup: Option<BackupConfig>,

    /// Override for the deployment lock file.
    #[serde(default)]
    pub lock_path: Option<PathBuf>,

    /// Per-stage retry for forward actions.
    #[serde(default)]
    pub stage_retry: RetryPolicy,

    /// Per-stage timeout in seconds.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_health_timeout_ms() -> u64 {
    5000
}

fn default_concurrency_cap() -> usize {
    4
}

fn default_degraded_ms() -> u64 {
    2000
}

fn default_daily_days() -> i64 {
    30
}

fn default_weekly_days() -> i64 {
    90
}

fn default_monthly_days() -> i64 {
    365
}

fn default_yearly_days() -> i64 {
    1825
}

fn default_stage_timeout_secs() -> u64 {
    600
}

impl DeployConfig {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(ShipwayError::NotInitialized);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let content = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, content.as_bytes())
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn lock_path(&self, root: &Path) -> PathBuf {
        self.lock_path
            .clone()
            .unwrap_or_else(|| paths::lock_path(root))
    }

    /// Static sanity checks on the configuration itself — not the host.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.environment.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "environment name is empty".to_string(),
            });
        }

        for target in &self.config_targets {
            if target.validator.is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "config target '{}' has no validator: renders will be installed unverified",
                        target.name
                    ),
                });
            }
        }

        let unit_names: Vec<&str> = self.services.iter().map(|u| u.name.as_str()).collect();
        for unit in &self.services {
            for dep in &unit.after {
                if !unit_names.contains(&dep.as_str()) {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Error,
                        message: format!(
                            "service '{}' depends on undeclared unit '{}'",
                            unit.name, dep
                        ),
                    });
                }
            }
        }

        if self.health.targets.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "no health targets configured: deploys cannot be verified".to_string(),
            });
        }

        if self.backup.is_none() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "no backup configured: rollback has no pre-run snapshot".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn minimal() -> DeployConfig {
        serde_yaml::from_str("environment: staging\n").unwrap()
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = minimal();
        assert_eq!(config.environment, "staging");
        assert_eq!(config.health.concurrency_cap, 4);
        assert_eq!(config.stage_retry.max_attempts, 3);
        assert!(!config.is_production());
    }

    #[test]
    fn roundtrip() {
        let dir = TempDir::new().unwrap();
        let config = minimal();
        config.save(dir.path()).unwrap();
        let loaded = DeployConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.environment, "staging");
    }

    #[test]
    fn load_missing_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            DeployConfig::load(dir.path()),
            Err(ShipwayError::NotInitialized)
        ));
    }

    #[test]
    fn validate_flags_unknown_dependency() {
        let yaml = r#"
environment: staging
services:
  - name: web
    exec: /usr/bin/web
    after: [database]
"#;
        let config: DeployConfig = serde_yaml::from_str(yaml).unwrap();
        let warnings = config.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("database")));
    }

    #[test]
    fn validate_warns_on_missing_validator() {
        let yaml = r#"
environment: staging
config_targets:
  - name: proxy
    template: /etc/templates/proxy.conf
    destination: /etc/proxy/proxy.conf
"#;
        let config: DeployConfig = serde_yaml::from_str(yaml).unwrap();
        let warnings = config.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("unverified")));
    }
}
