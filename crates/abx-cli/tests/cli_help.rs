use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_shows_all_commands() {
    cargo_bin_cmd!("abx")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("exec"))
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("tools"))
        .stdout(predicate::str::contains("remote"));
}

#[test]
fn test_exec_help_shows_prompt() {
    cargo_bin_cmd!("abx")
        .args(["exec", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--prompt"));
}

#[test]
fn test_config_help_shows_subcommands() {
    cargo_bin_cmd!("abx")
        .args(["config", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("path"))
        .stdout(predicate::str::contains("init"));
}

#[test]
fn test_invalid_protocol_is_rejected() {
    cargo_bin_cmd!("abx")
        .args(["--protocol", "carrier-pigeon", "exec", "-p", "hi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid protocol"));
}

#[test]
fn test_version_flag() {
    cargo_bin_cmd!("abx")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1"));
}
