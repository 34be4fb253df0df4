use assert_cmd::prelude::*;
use predicates::str::contains;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn strata(dir: &Path) -> Command {
    let mut command = Command::cargo_bin("strata").unwrap();
    command.current_dir(dir);
    command
}

fn project(dir: &TempDir) {
    fs::write(
        dir.path().join("strata.toml"),
        "[database]\npath = \"app.db\"\n\n[migrations]\nlocations = [\"migrations\"]\n",
    )
    .unwrap();
    fs::create_dir(dir.path().join("migrations")).unwrap();
    fs::write(
        dir.path().join("migrations/V1__create_persons.sql"),
        "CREATE TABLE persons (id INT, name TEXT);",
    )
    .unwrap();
}

#[test]
fn migrate_applies_and_reruns_cleanly() {
    let dir = TempDir::new().unwrap();
    project(&dir);

    strata(dir.path())
        .arg("migrate")
        .assert()
        .success()
        .stdout(contains("applied 1 migration"));

    strata(dir.path())
        .arg("migrate")
        .assert()
        .success()
        .stdout(contains("applied 0 migration"));
}

#[test]
fn info_shows_the_status_table() {
    let dir = TempDir::new().unwrap();
    project(&dir);

    strata(dir.path()).arg("migrate").assert().success();
    strata(dir.path())
        .arg("info")
        .assert()
        .success()
        .stdout(contains("create persons"))
        .stdout(contains("Success"));
}

#[test]
fn validate_reports_drift() {
    let dir = TempDir::new().unwrap();
    project(&dir);

    strata(dir.path()).arg("migrate").assert().success();
    strata(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(contains("validation passed"));

    fs::write(
        dir.path().join("migrations/V1__create_persons.sql"),
        "CREATE TABLE persons (id BIGINT, name TEXT);",
    )
    .unwrap();
    strata(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(contains("checksum"));
}

#[test]
fn target_flag_caps_the_run() {
    let dir = TempDir::new().unwrap();
    project(&dir);
    fs::write(
        dir.path().join("migrations/V2__create_cars.sql"),
        "CREATE TABLE cars (id INT);",
    )
    .unwrap();

    strata(dir.path())
        .args(["migrate", "--target", "1"])
        .assert()
        .success()
        .stdout(contains("applied 1 migration"));

    strata(dir.path())
        .arg("info")
        .assert()
        .success()
        .stdout(contains("Pending"));
}

#[test]
fn missing_config_file_fails_with_context() {
    let dir = TempDir::new().unwrap();
    strata(dir.path())
        .args(["migrate", "--config", "missing.toml"])
        .assert()
        .failure()
        .stderr(contains("could not open config file"));
}
