#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

fn install_agent(work_dir: &Path, script: &str) {
    let path = work_dir.join("bin").join("agent");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, script).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
}

fn home_with_fast_config() -> tempfile::TempDir {
    let home = tempdir().unwrap();
    fs::write(
        home.path().join("config.toml"),
        "[agent]\nlaunch_settle_ms = 0\n",
    )
    .unwrap();
    home
}

#[test]
fn test_exec_streams_agent_response() {
    let home = home_with_fast_config();
    let root = tempdir().unwrap();
    install_agent(
        root.path(),
        r#"#!/bin/sh
read -r line
printf '%s\n' '{"chunk":"He"}' '{"chunk":"llo"}' '{"done":true}'
"#,
    );

    cargo_bin_cmd!("abx")
        .env("ABX_HOME", home.path())
        .args(["--root", root.path().to_str().unwrap(), "exec", "-p", "hi"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello"));
}

#[test]
fn test_exec_without_agent_reports_discovery_failure() {
    let home = home_with_fast_config();
    let root = tempdir().unwrap();

    cargo_bin_cmd!("abx")
        .env("ABX_HOME", home.path())
        .args(["--root", root.path().to_str().unwrap(), "exec", "-p", "hi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_exec_surfaces_agent_error() {
    let home = home_with_fast_config();
    let root = tempdir().unwrap();
    install_agent(
        root.path(),
        r#"#!/bin/sh
read -r line
printf '%s\n' '{"error":"task failed"}' '{"done":true}'
"#,
    );

    cargo_bin_cmd!("abx")
        .env("ABX_HOME", home.path())
        .args(["--root", root.path().to_str().unwrap(), "exec", "-p", "hi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("task failed"));
}
