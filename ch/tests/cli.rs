//! Binary-level checks

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn chorus(temp: &TempDir) -> Command {
    let config = temp.path().join("chorus.yml");
    fs::write(
        &config,
        format!("storage:\n  data-dir: {}\nlog-level: debug\n", temp.path().join("data").display()),
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("chorus").unwrap();
    cmd.env("XDG_DATA_HOME", temp.path().join("xdg"))
        .env("XDG_RUNTIME_DIR", temp.path().join("run"))
        .arg("--config")
        .arg(config);
    cmd
}

#[test]
fn test_help_lists_commands() {
    let temp = TempDir::new().unwrap();
    chorus(&temp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("submit"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("run-job").not());
}

#[test]
fn test_status_of_unknown_session_is_running() {
    let temp = TempDir::new().unwrap();
    chorus(&temp)
        .args(["status", "quiet-meadow", "1", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"running\""))
        .stdout(predicate::str::contains("\"completedTurns\": 0"));
}

#[test]
fn test_submit_without_daemon_fails() {
    let temp = TempDir::new().unwrap();
    chorus(&temp)
        .args(["submit", "Is anyone there?"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Daemon is not running"));
}

#[test]
fn test_run_job_with_missing_file_fails() {
    let temp = TempDir::new().unwrap();
    chorus(&temp)
        .args(["run-job", "/nonexistent/job.json"])
        .assert()
        .failure()
        .code(predicate::ne(2));
}
