use anyhow::Context;
use shipway_core::{io, paths};
use std::path::Path;

/// Commented starter config written on first init.
const DEFAULT_CONFIG: &str = r#"# shipway deployment configuration
environment: staging

# Secret names to provision under .shipway/secrets/ (values are generated).
secrets: []

# Host requirements checked before every deploy.
required_executables: []
required_env: []

# Dependency installation (omit to skip the stage).
# install:
#   manifest: requirements.lock
#   command: [pip, install, -r, requirements.lock, --prefix]

# Schema migration command (omit to skip the stage).
# migration_command: [alembic, upgrade, head]

# Rendered configuration artifacts.
config_targets: []

# Managed services, started in dependency order.
services: []

# Health endpoints polled after service start.
health:
  targets: []

# Database snapshots (omit to disable the pre-run snapshot).
# backup:
#   dump_command: [pg_dump, app]
#   restore_command: [psql, app]
"#;

pub fn run(root: &Path) -> anyhow::Result<i32> {
    println!("Initializing shipway in: {}", root.display());

    let dirs = [
        paths::SHIPWAY_DIR,
        paths::STATE_DIR,
        paths::SECRETS_DIR,
        paths::BACKUPS_DIR,
        paths::RUNTIME_DIR,
        paths::PREV_DIR,
    ];
    for dir in dirs {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    let config_path = paths::config_path(root);
    if io::write_if_missing(&config_path, DEFAULT_CONFIG.as_bytes())
        .context("failed to write config.yaml")?
    {
        println!("  created: .shipway/config.yaml");
    } else {
        println!("  exists:  .shipway/config.yaml");
    }

    Ok(0)
}
