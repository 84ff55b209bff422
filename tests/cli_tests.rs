// CLI integration tests
// These run the compiled binary with HOME pointed at an empty directory

use std::process::{Command, Output};

const CLI_BINARY: &str = env!("CARGO_BIN_EXE_iqua");

fn run_cli(args: &[&str]) -> (Output, tempfile::TempDir) {
    let home = tempfile::tempdir().expect("Failed to create temp home");
    let output = Command::new(CLI_BINARY)
        .args(args)
        .env("HOME", home.path())
        .env_remove("IQUA_USERNAME")
        .env_remove("IQUA_PASSWORD")
        .env_remove("IQUA_SERIAL")
        .env_remove("IQUA_API_URL")
        .output()
        .expect("Failed to execute CLI");
    (output, home)
}

#[test]
fn test_cli_status_command_not_logged_in() {
    let (output, _home) = run_cli(&["status"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Not logged in"));
}

#[test]
fn test_cli_valve_command_requires_serial() {
    let (output, _home) = run_cli(&["valve", "close", "--username", "user@example.com"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Not logged in"));
    assert!(stderr.contains("--serial"));
}

#[test]
fn test_cli_help_command() {
    let (output, _home) = run_cli(&["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("A CLI for controlling iQua water softeners"));
    assert!(stdout.contains("login"));
    assert!(stdout.contains("logout"));
    assert!(stdout.contains("status"));
    assert!(stdout.contains("devices"));
    assert!(stdout.contains("valve"));
    assert!(stdout.contains("regenerate"));
}

#[test]
fn test_cli_version_command() {
    let (output, _home) = run_cli(&["--version"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("iqua"));
}

#[test]
fn test_cli_invalid_command() {
    let (output, _home) = run_cli(&["invalid-command"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error:") || stderr.contains("unrecognized"));
}

#[test]
fn test_cli_regenerate_help_lists_actions() {
    let (output, _home) = run_cli(&["regenerate", "--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("schedule"));
    assert!(stdout.contains("cancel"));
    assert!(stdout.contains("now"));
}

#[test]
fn test_cli_login_command_help() {
    let (output, _home) = run_cli(&["login", "--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Log in, resolve the device and store credentials"));
    assert!(stdout.contains("--username"));
    assert!(stdout.contains("--password"));
    assert!(stdout.contains("--serial"));
}

#[test]
fn test_cli_logout_command() {
    // Works whether or not anything is stored
    let (output, _home) = run_cli(&["logout"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Logged out successfully"));
}

#[test]
fn test_cli_logout_removes_stored_files() {
    let home = tempfile::tempdir().unwrap();
    let config_path = home.path().join(".iqua.yml");
    let tokens_path = home.path().join(".iqua-tokens.json");
    std::fs::write(
        &config_path,
        "username: user@example.com\ndevice_serial_number: SN-1001\n",
    )
    .unwrap();
    std::fs::write(&tokens_path, "{}").unwrap();

    let output = Command::new(CLI_BINARY)
        .arg("logout")
        .env("HOME", home.path())
        .output()
        .expect("Failed to execute CLI");

    assert!(output.status.success());
    assert!(!config_path.exists());
    assert!(!tokens_path.exists());
}

#[test]
fn test_cli_failed_run_without_tokens_writes_no_token_file() {
    // Nothing listens on port 9, so authentication can never succeed
    let (output, home) = run_cli(&[
        "status",
        "--username",
        "user@example.com",
        "--serial",
        "SN-1001",
        "--api-url",
        "http://127.0.0.1:9",
    ]);

    assert!(!output.status.success());
    assert!(!home.path().join(".iqua-tokens.json").exists());
}
