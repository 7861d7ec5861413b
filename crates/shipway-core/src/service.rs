//! Service lifecycle control through a host service-manager seam.
//!
//! `ServiceManager` is the narrow interface to the host (systemd in
//! production, an in-memory mock in tests). `LifecycleController` owns the
//! per-unit state machine and dependency ordering on top of it.

use crate::error::{Result, ShipwayError};
use crate::io;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

// ---------------------------------------------------------------------------
// ServiceUnit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    Always,
    #[default]
    OnFailure,
    Never,
}

impl RestartPolicy {
    fn systemd_value(&self) -> &'static str {
        match self {
            RestartPolicy::Always => "always",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::Never => "no",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceUnit {
    pub name: String,
    pub exec: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment file reference — secrets reach the process via this file,
    /// never via the argument list.
    #[serde(default)]
    pub env_file: Option<PathBuf>,
    /// Units that must be active before this one starts.
    #[serde(default)]
    pub after: Vec<String>,
    #[serde(default)]
    pub restart: RestartPolicy,
}

impl ServiceUnit {
    /// Render a systemd unit definition for this service.
    pub fn to_systemd_unit(&self) -> String {
        let mut out = String::new();
        out.push_str("[Unit]\n");
        out.push_str(&format!("Description={} (managed by shipway)\n", self.name));
        out.push_str("After=network.target");
        for dep in &self.after {
            out.push_str(&format!(" {dep}.service"));
        }
        out.push('\n');
        if !self.after.is_empty() {
            let deps: Vec<String> = self.after.iter().map(|d| format!("{d}.service")).collect();
            out.push_str(&format!("Requires={}\n", deps.join(" ")));
        }
        out.push_str("\n[Service]\n");
        let mut exec = self.exec.display().to_string();
        for arg in &self.args {
            exec.push(' ');
            exec.push_str(arg);
        }
        out.push_str(&format!("ExecStart={exec}\n"));
        if let Some(env_file) = &self.env_file {
            out.push_str(&format!("EnvironmentFile={}\n", env_file.display()));
        }
        out.push_str(&format!("Restart={}\n", self.restart.systemd_value()));
        out.push_str("\n[Install]\nWantedBy=multi-user.target\n");
        out
    }
}

// ---------------------------------------------------------------------------
// UnitState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Unknown,
    Installed,
    Active,
    Failed,
    Stopped,
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnitState::Unknown => "unknown",
            UnitState::Installed => "installed",
            UnitState::Active => "active",
            UnitState::Failed => "failed",
            UnitState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// ServiceManager seam
// ---------------------------------------------------------------------------

pub trait ServiceManager {
    fn install_unit(&self, unit: &ServiceUnit) -> Result<()>;
    fn start(&self, name: &str) -> Result<()>;
    fn stop(&self, name: &str) -> Result<()>;
    /// Native restart primitive — avoids the no-process window of stop+start.
    fn restart(&self, name: &str) -> Result<()>;
    fn reload(&self, name: &str) -> Result<()>;
    fn is_active(&self, name: &str) -> Result<bool>;
}

/// systemd-backed manager driving `systemctl`.
pub struct SystemdManager {
    unit_dir: PathBuf,
}

impl SystemdManager {
    pub fn new() -> Self {
        Self {
            unit_dir: PathBuf::from("/etc/systemd/system"),
        }
    }

    pub fn with_unit_dir(unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
        }
    }

    fn systemctl(&self, args: &[&str], unit: &str) -> Result<()> {
        let output = Command::new("systemctl")
            .args(args)
            .arg(format!("{unit}.service"))
            .output()
            .map_err(|e| ShipwayError::ServiceControl {
                unit: unit.to_string(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ShipwayError::ServiceControl {
                unit: unit.to_string(),
                reason: stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

impl Default for SystemdManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager for SystemdManager {
    fn install_unit(&self, unit: &ServiceUnit) -> Result<()> {
        let path = self.unit_dir.join(format!("{}.service", unit.name));
        io::atomic_write(&path, unit.to_systemd_unit().as_bytes())?;
        let output = Command::new("systemctl")
            .arg("daemon-reload")
            .output()
            .map_err(|e| ShipwayError::ServiceControl {
                unit: unit.name.clone(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(ShipwayError::ServiceControl {
                unit: unit.name.clone(),
                reason: "daemon-reload failed".to_string(),
            });
        }
        Ok(())
    }

    fn start(&self, name: &str) -> Result<()> {
        self.systemctl(&["start"], name)
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.systemctl(&["stop"], name)
    }

    fn restart(&self, name: &str) -> Result<()> {
        self.systemctl(&["restart"], name)
    }

    fn reload(&self, name: &str) -> Result<()> {
        self.systemctl(&["reload-or-restart"], name)
    }

    fn is_active(&self, name: &str) -> Result<bool> {
        let status = Command::new("systemctl")
            .args(["is-active", "--quiet"])
            .arg(format!("{name}.service"))
            .status()
            .map_err(|e| ShipwayError::ServiceControl {
                unit: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(status.success())
    }
}

/// In-memory manager for tests and dry runs.
#[derive(Default)]
pub struct MockManager {
    running: std::sync::Mutex<std::collections::HashSet<String>>,
    installed: std::sync::Mutex<std::collections::HashSet<String>>,
    /// Units whose start always fails — simulates a broken service.
    pub fail_to_start: std::sync::Mutex<std::collections::HashSet<String>>,
}

impl MockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_start(&self, name: &str) {
        self.fail_to_start.lock().unwrap().insert(name.to_string());
    }
}

impl ServiceManager for MockManager {
    fn install_unit(&self, unit: &ServiceUnit) -> Result<()> {
        self.installed.lock().unwrap().insert(unit.name.clone());
        Ok(())
    }

    fn start(&self, name: &str) -> Result<()> {
        if self.fail_to_start.lock().unwrap().contains(name) {
            return Err(ShipwayError::ServiceControl {
                unit: name.to_string(),
                reason: "start failed".to_string(),
            });
        }
        self.running.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.running.lock().unwrap().remove(name);
        Ok(())
    }

    fn restart(&self, name: &str) -> Result<()> {
        self.stop(name)?;
        self.start(name)
    }

    fn reload(&self, name: &str) -> Result<()> {
        if self.running.lock().unwrap().contains(name) {
            Ok(())
        } else {
            self.start(name)
        }
    }

    fn is_active(&self, name: &str) -> Result<bool> {
        Ok(self.running.lock().unwrap().contains(name))
    }
}

// ---------------------------------------------------------------------------
// LifecycleController
// ---------------------------------------------------------------------------

pub struct LifecycleController<'m> {
    manager: &'m dyn ServiceManager,
    states: HashMap<String, UnitState>,
}

impl<'m> LifecycleController<'m> {
    pub fn new(manager: &'m dyn ServiceManager) -> Self {
        Self {
            manager,
            states: HashMap::new(),
        }
    }

    fn state(&self, name: &str) -> UnitState {
        self.states.get(name).copied().unwrap_or(UnitState::Unknown)
    }

    /// Read-only status refresh: observes the manager without transitioning.
    /// A unit recorded active that no longer runs is reported failed.
    pub fn status(&mut self, name: &str) -> Result<UnitState> {
        let recorded = self.state(name);
        let live = self.manager.is_active(name)?;
        let refreshed = match (recorded, live) {
            (_, true) => UnitState::Active,
            (UnitState::Active, false) => UnitState::Failed,
            (state, false) => state,
        };
        self.states.insert(name.to_string(), refreshed);
        Ok(refreshed)
    }

    /// Install (write + register) a unit: unknown → installed.
    pub fn install(&mut self, unit: &ServiceUnit) -> Result<()> {
        self.manager.install_unit(unit)?;
        if self.state(&unit.name) == UnitState::Unknown {
            self.states.insert(unit.name.clone(), UnitState::Installed);
        }
        Ok(())
    }

    /// Start a unit: installed/stopped → active, or → failed on error.
    ///
    /// All declared dependencies must report active first. A failed dependency
    /// fails immediately rather than attempting the start and timing out.
    pub fn start(&mut self, unit: &ServiceUnit) -> Result<()> {
        let from = self.state(&unit.name);
        if !matches!(from, UnitState::Installed | UnitState::Stopped) {
            return Err(ShipwayError::InvalidTransition {
                unit: unit.name.clone(),
                from: from.to_string(),
                to: UnitState::Active.to_string(),
            });
        }

        for dep in &unit.after {
            let dep_state = self.status(dep)?;
            if dep_state != UnitState::Active {
                return Err(ShipwayError::DependencyUnavailable {
                    unit: unit.name.clone(),
                    dependency: dep.clone(),
                    state: dep_state.to_string(),
                });
            }
        }

        match self.manager.start(&unit.name) {
            Ok(()) => {
                self.states.insert(unit.name.clone(), UnitState::Active);
                tracing::info!(unit = %unit.name, "service started");
                Ok(())
            }
            Err(e) => {
                self.states.insert(unit.name.clone(), UnitState::Failed);
                Err(e)
            }
        }
    }

    /// Stop a unit: active → stopped.
    pub fn stop(&mut self, name: &str) -> Result<()> {
        let from = self.status(name)?;
        if from != UnitState::Active {
            return Err(ShipwayError::InvalidTransition {
                unit: name.to_string(),
                from: from.to_string(),
                to: UnitState::Stopped.to_string(),
            });
        }
        self.manager.stop(name)?;
        self.states.insert(name.to_string(), UnitState::Stopped);
        Ok(())
    }

    /// Restart a unit in place using the manager's native primitive.
    pub fn restart(&mut self, name: &str) -> Result<()> {
        let from = self.status(name)?;
        if from != UnitState::Active {
            return Err(ShipwayError::InvalidTransition {
                unit: name.to_string(),
                from: from.to_string(),
                to: UnitState::Active.to_string(),
            });
        }
        match self.manager.restart(name) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.states.insert(name.to_string(), UnitState::Failed);
                Err(e)
            }
        }
    }

    pub fn reload(&self, name: &str) -> Result<()> {
        self.manager.reload(name)
    }

    /// Install and start every unit in dependency order. Units already
    /// active are left alone, so a partial re-run converges instead of
    /// tripping on an invalid transition.
    pub fn start_all(&mut self, units: &[ServiceUnit]) -> Result<()> {
        for unit in order_by_dependencies(units)? {
            if self.status(&unit.name)? == UnitState::Active {
                continue;
            }
            self.install(unit)?;
            self.start(unit)?;
        }
        Ok(())
    }

    /// Stop every unit that is currently active, dependents first.
    pub fn stop_all(&mut self, units: &[ServiceUnit]) -> Result<()> {
        let ordered = order_by_dependencies(units)?;
        for unit in ordered.iter().rev() {
            if self.status(&unit.name)? == UnitState::Active {
                self.stop(&unit.name)?;
            }
        }
        Ok(())
    }

    /// Names of units still reporting active.
    pub fn active_units(&mut self, units: &[ServiceUnit]) -> Result<Vec<String>> {
        let mut active = Vec::new();
        for unit in units {
            if self.status(&unit.name)? == UnitState::Active {
                active.push(unit.name.clone());
            }
        }
        Ok(active)
    }
}

/// Topological order over `after` edges. Declaration order breaks ties; a
/// cycle surfaces as `DependencyUnavailable` on the first stuck unit.
pub fn order_by_dependencies(units: &[ServiceUnit]) -> Result<Vec<&ServiceUnit>> {
    let mut ordered: Vec<&ServiceUnit> = Vec::with_capacity(units.len());
    let mut placed: Vec<&str> = Vec::with_capacity(units.len());
    let mut remaining: Vec<&ServiceUnit> = units.iter().collect();

    while !remaining.is_empty() {
        let before = ordered.len();
        remaining.retain(|unit| {
            let ready = unit
                .after
                .iter()
                // Dependencies outside the managed set are assumed external and active.
                .all(|d| placed.contains(&d.as_str()) || !units.iter().any(|u| u.name == *d));
            if ready {
                ordered.push(unit);
                placed.push(unit.name.as_str());
            }
            !ready
        });
        if ordered.len() == before {
            let stuck = remaining[0];
            return Err(ShipwayError::DependencyUnavailable {
                unit: stuck.name.clone(),
                dependency: stuck.after.first().cloned().unwrap_or_default(),
                state: "cyclic".to_string(),
            });
        }
    }
    Ok(ordered)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str, after: &[&str]) -> ServiceUnit {
        ServiceUnit {
            name: name.to_string(),
            exec: PathBuf::from("/usr/bin/true"),
            args: vec![],
            env_file: None,
            after: after.iter().map(|s| s.to_string()).collect(),
            restart: RestartPolicy::OnFailure,
        }
    }

    #[test]
    fn install_then_start_then_stop() {
        let manager = MockManager::new();
        let mut ctl = LifecycleController::new(&manager);
        let web = unit("web", &[]);

        ctl.install(&web).unwrap();
        assert_eq!(ctl.status("web").unwrap(), UnitState::Installed);

        ctl.start(&web).unwrap();
        assert_eq!(ctl.status("web").unwrap(), UnitState::Active);

        ctl.stop("web").unwrap();
        assert_eq!(ctl.status("web").unwrap(), UnitState::Stopped);
    }

    #[test]
    fn start_unknown_unit_is_invalid_transition() {
        let manager = MockManager::new();
        let mut ctl = LifecycleController::new(&manager);
        let result = ctl.start(&unit("web", &[]));
        assert!(matches!(result, Err(ShipwayError::InvalidTransition { .. })));
    }

    #[test]
    fn start_with_inactive_dependency_fails_fast() {
        let manager = MockManager::new();
        let mut ctl = LifecycleController::new(&manager);
        let web = unit("web", &["database"]);
        ctl.install(&web).unwrap();
        let result = ctl.start(&web);
        assert!(matches!(
            result,
            Err(ShipwayError::DependencyUnavailable { .. })
        ));
    }

    #[test]
    fn start_failure_records_failed_state() {
        let manager = MockManager::new();
        manager.fail_start("web");
        let mut ctl = LifecycleController::new(&manager);
        let web = unit("web", &[]);
        ctl.install(&web).unwrap();
        assert!(ctl.start(&web).is_err());
        assert_eq!(ctl.status("web").unwrap(), UnitState::Failed);
    }

    #[test]
    fn start_all_honors_dependency_order() {
        let manager = MockManager::new();
        let mut ctl = LifecycleController::new(&manager);
        // Declared out of order on purpose.
        let units = vec![unit("web", &["worker"]), unit("worker", &[])];
        ctl.start_all(&units).unwrap();
        assert_eq!(ctl.status("worker").unwrap(), UnitState::Active);
        assert_eq!(ctl.status("web").unwrap(), UnitState::Active);
    }

    #[test]
    fn cyclic_dependencies_detected() {
        let units = vec![unit("a", &["b"]), unit("b", &["a"])];
        assert!(matches!(
            order_by_dependencies(&units),
            Err(ShipwayError::DependencyUnavailable { .. })
        ));
    }

    #[test]
    fn status_detects_dead_active_unit() {
        let manager = MockManager::new();
        let mut ctl = LifecycleController::new(&manager);
        let web = unit("web", &[]);
        ctl.install(&web).unwrap();
        ctl.start(&web).unwrap();
        // Kill it behind the controller's back.
        manager.stop("web").unwrap();
        assert_eq!(ctl.status("web").unwrap(), UnitState::Failed);
    }

    #[test]
    fn stop_all_reverses_order() {
        let manager = MockManager::new();
        let mut ctl = LifecycleController::new(&manager);
        let units = vec![unit("worker", &[]), unit("web", &["worker"])];
        ctl.start_all(&units).unwrap();
        ctl.stop_all(&units).unwrap();
        assert!(ctl.active_units(&units).unwrap().is_empty());
    }

    #[test]
    fn systemd_unit_rendering() {
        let mut web = unit("web", &["database"]);
        web.args = vec!["--port".to_string(), "8080".to_string()];
        web.env_file = Some(PathBuf::from("/srv/app/.env"));
        let rendered = web.to_systemd_unit();
        assert!(rendered.contains("ExecStart=/usr/bin/true --port 8080"));
        assert!(rendered.contains("Requires=database.service"));
        assert!(rendered.contains("EnvironmentFile=/srv/app/.env"));
        assert!(rendered.contains("Restart=on-failure"));
    }
}
