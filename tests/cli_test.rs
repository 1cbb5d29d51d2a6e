//! Command-line behaviour of the healbox binary.
//!
//! Only commands that need neither Docker nor an LLM are exercised here.

use std::process::Command;

fn healbox() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_healbox"));
    cmd.env_remove("HEALBOX_PROVIDER")
        .env_remove("RUST_LOG")
        .env("HEALBOX_LOG_LEVEL", "error");
    cmd
}

#[test]
fn test_cli_help() {
    let output = healbox().arg("--help").output().expect("Failed to run healbox");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["run", "worker", "classify", "health"] {
        assert!(stdout.contains(command), "help should list '{}'", command);
    }
}

#[test]
fn test_cli_version() {
    let output = healbox().arg("--version").output().expect("Failed to run healbox");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_classify_user_error() {
    let output = healbox()
        .args(["classify", "Error: Cannot find module 'react'"])
        .output()
        .expect("Failed to run healbox");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "USER_ERROR");
}

#[test]
fn test_classify_service_error_as_json() {
    let output = healbox()
        .args(["classify", "--format", "json", "ENOSPC: no space left on device"])
        .output()
        .expect("Failed to run healbox");
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["classification"], "SERVICE_ERROR");
}

#[test]
fn test_classify_reads_stdin() {
    use std::io::Write;
    use std::process::Stdio;

    let mut child = healbox()
        .args(["classify", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("Failed to run healbox");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"npm ERR! missing script: build\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "USER_ERROR");
}

#[test]
fn test_run_rejects_missing_directory() {
    let output = healbox()
        .args(["run", "/definitely/not/a/project", "--no-deploy"])
        .output()
        .expect("Failed to run healbox");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_invalid_provider_is_rejected() {
    let output = healbox()
        .args(["run", ".", "--provider", "nonsense"])
        .output()
        .expect("Failed to run healbox");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid provider"));
}

#[test]
fn test_health_reports_configuration() {
    let output = healbox()
        .args(["health", "--format", "json"])
        .output()
        .expect("Failed to run healbox");
    // Exit status depends on whether a Docker daemon is reachable
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(value["health_status"]["docker"]["available"].is_boolean());
    assert_eq!(value["health_status"]["llm"]["message"], "LLM disabled");
    assert_eq!(value["configuration"]["provider"], "none");
}
