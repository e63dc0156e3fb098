use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("shellward").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("shellward 0.1.0"));
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("shellward").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--init-config"))
        .stdout(predicate::str::contains("--config"));
}

#[test]
fn test_cli_init_config_writes_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("shellward.toml");

    let mut cmd = Command::cargo_bin("shellward").unwrap();
    cmd.arg("--init-config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote default configuration"));

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("[security]"));
    assert!(content.contains("command_timeout"));
}

#[test]
fn test_cli_init_config_refuses_overwrite() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = write_config(&dir, "# mine\n");

    let mut cmd = Command::cargo_bin("shellward").unwrap();
    cmd.arg("--init-config").arg(&path).assert().failure();
    assert_eq!(fs::read_to_string(&path).unwrap(), "# mine\n");
}

#[test]
fn test_cli_missing_config_file() {
    let mut cmd = Command::cargo_bin("shellward").unwrap();
    cmd.args(["--config", "/nonexistent/shellward.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn test_cli_rejects_unknown_config_keys() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = write_config(&dir, "[security]\ncommand_timeot = 5\n");

    let mut cmd = Command::cargo_bin("shellward").unwrap();
    cmd.arg("--config").arg(&path).assert().failure();
}

#[test]
fn test_cli_serves_stdio_until_eof() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = write_config(&dir, "[logging]\nlevel = \"error\"\n");

    let input = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        "\n",
        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        "\n",
    );

    let mut cmd = Command::cargo_bin("shellward").unwrap();
    cmd.arg("--config")
        .arg(&path)
        .write_stdin(input)
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"protocolVersion\":\"2024-11-05\""))
        .stdout(predicate::str::contains("execute_command"))
        .stdout(predicate::str::contains("get_command_history"));
}
