use crate::output::{print_json, print_table};
use clap::Subcommand;
use shipway_core::secrets;
use std::path::Path;

#[derive(Subcommand)]
pub enum SecretsSubcommand {
    /// List managed secrets (names and timestamps, never values)
    List,
    /// Replace a secret's value with a freshly generated one
    Rotate {
        /// Secret name
        name: String,
    },
}

pub fn run(root: &Path, subcommand: SecretsSubcommand, json: bool) -> anyhow::Result<i32> {
    match subcommand {
        SecretsSubcommand::List => {
            let records = secrets::list(root)?;
            if json {
                print_json(&records)?;
            } else {
                let rows = records
                    .iter()
                    .map(|r| {
                        vec![
                            r.name.clone(),
                            r.created_at.to_rfc3339(),
                            r.rotated_at
                                .map(|t| t.to_rfc3339())
                                .unwrap_or_else(|| "-".to_string()),
                        ]
                    })
                    .collect();
                print_table(&["NAME", "CREATED", "ROTATED"], rows);
            }
        }
        SecretsSubcommand::Rotate { name } => {
            let record = secrets::provision(root, &name, true)?;
            if json {
                print_json(&record)?;
            } else {
                println!("rotated secret '{name}'");
            }
        }
    }
    Ok(0)
}
