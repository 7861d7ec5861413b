use crate::output::{print_json, print_table};
use anyhow::Context;
use shipway_core::config::DeployConfig;
use shipway_core::service::SystemdManager;
use shipway_core::validate;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<i32> {
    let config = DeployConfig::load(root).context("failed to load deployment config")?;
    let requirements = validate::requirements_for(&config, root);
    let manager = SystemdManager::new();
    let findings = validate::validate(&requirements, &manager, config.is_production());

    if json {
        print_json(&findings)?;
    } else if findings.is_empty() {
        println!("all {} requirements satisfied", requirements.len());
    } else {
        let rows = findings
            .iter()
            .map(|f| {
                vec![
                    format!("{:?}", f.severity).to_lowercase(),
                    f.check.clone(),
                    f.detail.clone(),
                ]
            })
            .collect();
        print_table(&["SEVERITY", "CHECK", "DETAIL"], rows);
    }

    Ok(if validate::has_blocking(&findings) { 1 } else { 0 })
}
