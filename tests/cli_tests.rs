//! Integration tests for configuration validation through the binary.
//!
//! These tests run `--check-config` and `--show-config`, which load every
//! input file but never connect to a database.

use std::io::Write;
use std::process::Output;
use tempfile::NamedTempFile;

/// Helper to get the binary path
fn binary_path() -> std::path::PathBuf {
    std::path::PathBuf::from(env!("CARGO_BIN_EXE_pg-custom-exporter"))
}

fn file_with(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write temp file");
    file
}

fn run(args: &[&str]) -> Output {
    std::process::Command::new(binary_path())
        .args(["--no-config"])
        .args(args)
        .env_remove("DBS_CONFIG_FILE")
        .env_remove("QUERIES_FILE")
        .env_remove("EXPORTER_API_KEY")
        .env_remove("PORT")
        .env_remove("LOG_LEVEL")
        .output()
        .expect("Failed to execute command")
}

fn combined(output: &Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

const TARGETS: &str = "- {name: primary, host: localhost, port: 5432, user: u, password: p, database: d}\n";

#[test]
fn test_check_config_requires_targets_file() {
    let output = run(&["--check-config"]);
    assert!(!output.status.success());
    assert!(
        combined(&output).contains("No targets file configured"),
        "got: {}",
        combined(&output)
    );
}

#[test]
fn test_check_config_valid_inputs() {
    let targets = file_with(".yaml", TARGETS);
    let queries = file_with(
        ".json",
        r#"[{"name": "jobs", "help": "Jobs", "query": "SELECT 1 AS n"},
            {"name": "pg_active_connections", "help": "dup", "query": "SELECT 1"}]"#,
    );

    let output = run(&[
        "--check-config",
        "--targets-file",
        targets.path().to_str().unwrap(),
        "--queries-file",
        queries.path().to_str().unwrap(),
    ]);

    let text = combined(&output);
    assert!(output.status.success(), "got: {}", text);
    assert!(text.contains("1 database target(s)"));
    assert!(text.contains("1 of 2 custom metric(s) accepted"));
    assert!(text.contains("Configuration is valid"));
}

#[test]
fn test_check_config_targets_from_env() {
    let targets = file_with(".yaml", TARGETS);
    let output = std::process::Command::new(binary_path())
        .args(["--no-config", "--check-config"])
        .env("DBS_CONFIG_FILE", targets.path())
        .env_remove("QUERIES_FILE")
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success(), "got: {}", combined(&output));
}

#[test]
fn test_check_config_missing_target_field() {
    let targets = file_with(".yaml", "- {name: primary, host: localhost, port: 5432}\n");
    let output = run(&["--check-config", "--targets-file", targets.path().to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(combined(&output).contains("missing mandatory field 'user'"));
}

#[test]
fn test_check_config_empty_targets() {
    let targets = file_with(".json", "[]");
    let output = run(&["--check-config", "--targets-file", targets.path().to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(combined(&output).contains("no database targets configured"));
}

#[test]
fn test_check_config_missing_queries_file() {
    let targets = file_with(".yaml", TARGETS);
    let output = run(&[
        "--check-config",
        "--targets-file",
        targets.path().to_str().unwrap(),
        "--queries-file",
        "/nonexistent/queries.json",
    ]);
    assert!(!output.status.success());
    assert!(combined(&output).contains("file not found"));
}

#[test]
fn test_tls_enabled_without_paths() {
    let targets = file_with(".yaml", TARGETS);
    let output = run(&[
        "--enable-tls",
        "--check-config",
        "--targets-file",
        targets.path().to_str().unwrap(),
    ]);
    assert!(!output.status.success());
    assert!(combined(&output)
        .contains("TLS is enabled but neither tls_cert_path nor tls_key_path are set"));
}

#[test]
fn test_show_config_hides_api_key() {
    let output = run(&[
        "--show-config",
        "--config-format",
        "json",
        "--api-key",
        "super-secret",
        "--port",
        "9999",
    ]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let value: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert_eq!(value["port"], 9999);
    assert_eq!(value["const_labels"]["exporter"], "custom_pg_exporter");
    assert!(!stdout.contains("super-secret"));
}
