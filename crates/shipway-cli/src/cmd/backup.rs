use crate::output::{print_json, print_table};
use anyhow::{bail, Context};
use clap::Subcommand;
use shipway_core::backup;
use shipway_core::config::DeployConfig;
use shipway_core::service::{LifecycleController, SystemdManager};
use std::path::Path;

#[derive(Subcommand)]
pub enum BackupSubcommand {
    /// Take a snapshot now
    Create,
    /// Restore a snapshot (stops managed services first)
    Restore {
        /// Snapshot id, as shown by `backup list`
        id: String,
    },
    /// Apply the retention policy
    Prune,
    /// List recorded snapshots
    List,
}

pub fn run(root: &Path, subcommand: BackupSubcommand, json: bool) -> anyhow::Result<i32> {
    let config = DeployConfig::load(root).context("failed to load deployment config")?;
    let Some(backup_config) = &config.backup else {
        bail!("no backup configuration; set `backup:` in .shipway/config.yaml");
    };
    let lock = config.lock_path(root);

    match subcommand {
        BackupSubcommand::Create => {
            let artifact = backup::snapshot(root, backup_config, &lock)?;
            if json {
                print_json(&artifact)?;
            } else {
                println!("created snapshot {} ({})", artifact.id, artifact.class);
            }
        }
        BackupSubcommand::Restore { id } => {
            let manager = SystemdManager::new();
            let mut lifecycle = LifecycleController::new(&manager);
            backup::restore(root, backup_config, &id, &lock, &mut lifecycle, &config.services)?;
            println!("restored snapshot {id}");
            println!("services were stopped; run `shipway deploy` to bring them back");
        }
        BackupSubcommand::Prune => {
            let removed = backup::prune(root, &backup_config.retention, &lock)?;
            if json {
                print_json(&removed)?;
            } else if removed.is_empty() {
                println!("nothing to prune");
            } else {
                for id in &removed {
                    println!("pruned {id}");
                }
            }
        }
        BackupSubcommand::List => {
            let artifacts = backup::list(root)?;
            if json {
                print_json(&artifacts)?;
            } else {
                let rows = artifacts
                    .iter()
                    .map(|a| {
                        vec![
                            a.id.clone(),
                            a.class.to_string(),
                            a.created_at.to_rfc3339(),
                            a.size.to_string(),
                        ]
                    })
                    .collect();
                print_table(&["ID", "CLASS", "CREATED", "BYTES"], rows);
            }
        }
    }
    Ok(0)
}
