#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn shipway(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("shipway").unwrap();
    cmd.current_dir(dir.path()).env("SHIPWAY_ROOT", dir.path());
    cmd
}

fn init_root(dir: &TempDir) {
    shipway(dir).arg("init").assert().success();
}

fn write_config(dir: &TempDir, yaml: &str) {
    std::fs::write(dir.path().join(".shipway/config.yaml"), yaml).unwrap();
}

// ---------------------------------------------------------------------------
// shipway init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_directory_tree() {
    let dir = TempDir::new().unwrap();
    shipway(&dir).arg("init").assert().success();

    assert!(dir.path().join(".shipway").is_dir());
    assert!(dir.path().join(".shipway/state").is_dir());
    assert!(dir.path().join(".shipway/secrets").is_dir());
    assert!(dir.path().join(".shipway/backups").is_dir());
    assert!(dir.path().join(".shipway/config.yaml").exists());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    shipway(&dir).arg("init").assert().success();
    shipway(&dir).arg("init").assert().success();
}

#[test]
fn init_preserves_existing_config() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    write_config(&dir, "environment: production\n");
    shipway(&dir).arg("init").assert().success();

    let content = std::fs::read_to_string(dir.path().join(".shipway/config.yaml")).unwrap();
    assert_eq!(content, "environment: production\n");
}

// ---------------------------------------------------------------------------
// shipway validate
// ---------------------------------------------------------------------------

#[test]
fn validate_reports_missing_executable() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    write_config(
        &dir,
        "environment: staging\nrequired_executables: [definitely-not-a-real-tool]\n",
    );

    shipway(&dir)
        .arg("validate")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("definitely-not-a-real-tool"));
}

#[test]
fn validate_passes_on_satisfiable_requirements() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    write_config(&dir, "environment: staging\nrequired_executables: [sh]\n");

    shipway(&dir).arg("validate").assert().success();
}

// ---------------------------------------------------------------------------
// shipway deploy
// ---------------------------------------------------------------------------

#[test]
fn deploy_with_failing_validation_exits_1_and_writes_nothing() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    write_config(
        &dir,
        "environment: staging\nrequired_executables: [definitely-not-a-real-tool]\nsecrets: [db-password]\n",
    );

    shipway(&dir).arg("deploy").assert().code(1);

    // Validation failed before the secrets stage: nothing provisioned.
    assert!(!dir.path().join(".shipway/secrets/db-password").exists());
}

#[test]
fn deploy_provisions_secrets_and_records_run() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    write_config(&dir, "environment: staging\nsecrets: [db-password]\n");

    shipway(&dir)
        .arg("deploy")
        .assert()
        .success()
        .stdout(predicate::str::contains("succeeded"));

    assert!(dir.path().join(".shipway/secrets/db-password").exists());
    let runs = std::fs::read_dir(dir.path().join(".shipway/state")).unwrap();
    assert_eq!(runs.count(), 1);
}

#[test]
fn deploy_never_prints_secret_values() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    write_config(&dir, "environment: staging\nsecrets: [api-key]\n");

    shipway(&dir).arg("deploy").assert().success();

    let value =
        std::fs::read_to_string(dir.path().join(".shipway/secrets/api-key")).unwrap();
    shipway(&dir)
        .args(["secrets", "list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&value).not());
}

#[test]
fn second_deploy_is_idempotent() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    write_config(&dir, "environment: staging\nsecrets: [db-password]\n");

    shipway(&dir).arg("deploy").assert().success();
    let before =
        std::fs::read_to_string(dir.path().join(".shipway/secrets/db-password")).unwrap();

    shipway(&dir)
        .arg("deploy")
        .assert()
        .success()
        .stdout(predicate::str::contains("skipped"));

    let after =
        std::fs::read_to_string(dir.path().join(".shipway/secrets/db-password")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn concurrent_deploy_exits_4() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    write_config(&dir, "environment: staging\n");
    std::fs::write(
        dir.path().join(".shipway/deploy.lock"),
        format!("pid: {}\n", std::process::id()),
    )
    .unwrap();

    shipway(&dir)
        .arg("deploy")
        .assert()
        .code(4)
        .stderr(predicate::str::contains("in progress"));
}

#[test]
fn failed_migration_rolls_back_and_exits_2() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    write_config(
        &dir,
        "environment: staging\nsecrets: [db-password]\nmigration_command: [\"false\"]\n",
    );

    shipway(&dir)
        .arg("deploy")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("rolled_back"));

    // The secret created by the failed run was rolled back.
    assert!(!dir.path().join(".shipway/secrets/db-password").exists());
}

// ---------------------------------------------------------------------------
// shipway secrets
// ---------------------------------------------------------------------------

#[test]
fn secrets_rotate_replaces_value() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    write_config(&dir, "environment: staging\nsecrets: [api-key]\n");
    shipway(&dir).arg("deploy").assert().success();
    let before =
        std::fs::read_to_string(dir.path().join(".shipway/secrets/api-key")).unwrap();

    shipway(&dir).args(["secrets", "rotate", "api-key"]).assert().success();

    let after =
        std::fs::read_to_string(dir.path().join(".shipway/secrets/api-key")).unwrap();
    assert_ne!(before, after);
}

// ---------------------------------------------------------------------------
// shipway backup
// ---------------------------------------------------------------------------

fn backup_config() -> &'static str {
    r#"
environment: staging
backup:
  dump_command: [echo, snapshot-payload]
  restore_command: [cat]
"#
}

#[test]
fn backup_create_and_list() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    write_config(&dir, backup_config());

    shipway(&dir)
        .args(["backup", "create"])
        .assert()
        .success()
        .stdout(predicate::str::contains("created snapshot"));

    shipway(&dir)
        .args(["backup", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ID"));
}

#[test]
fn backup_prune_keeps_fresh_snapshot() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    write_config(&dir, backup_config());
    shipway(&dir).args(["backup", "create"]).assert().success();

    shipway(&dir)
        .args(["backup", "prune"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to prune"));
}

#[test]
fn backup_create_during_deploy_exits_4() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    write_config(&dir, backup_config());
    std::fs::write(
        dir.path().join(".shipway/deploy.lock"),
        format!("pid: {}\n", std::process::id()),
    )
    .unwrap();

    shipway(&dir)
        .args(["backup", "create"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("in progress"));
}

#[test]
fn backup_restore_unknown_id_fails() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    write_config(&dir, backup_config());

    shipway(&dir)
        .args(["backup", "restore", "20240101T000000-deadbeef"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not found"));
}

// ---------------------------------------------------------------------------
// shipway status
// ---------------------------------------------------------------------------

#[test]
fn status_before_first_deploy() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    write_config(&dir, "environment: staging\n");

    shipway(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("no deployments recorded"));
}

#[test]
fn status_shows_latest_run() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    write_config(&dir, "environment: staging\nsecrets: [s1]\n");
    shipway(&dir).arg("deploy").assert().success();

    shipway(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("latest run"));
}

// ---------------------------------------------------------------------------
// shipway rollback
// ---------------------------------------------------------------------------

#[test]
fn rollback_with_no_runs_fails() {
    let dir = TempDir::new().unwrap();
    init_root(&dir);
    write_config(&dir, "environment: staging\n");

    shipway(&dir)
        .arg("rollback")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no rollbackable run"));
}
