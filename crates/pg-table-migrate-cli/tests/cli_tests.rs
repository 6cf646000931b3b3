//! CLI integration tests for pg-table-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for error conditions that need no live database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the pg-table-migrate binary.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("pg-table-migrate").unwrap();
    cmd.env_remove("PGTM_SOURCE_PASSWORD")
        .env_remove("PGTM_TARGET_PASSWORD");
    cmd
}

/// Config pointing at a port nothing listens on.
fn config_file(chunk_size: usize) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
source:
  host: 127.0.0.1
  port: 1
  database: sales
  user: reader
target:
  host: 127.0.0.1
  port: 1
  database: warehouse
  user: writer
tables:
  source: {{ schema: public, table: orders }}
  target: {{ schema: archive, table: orders }}
migration:
  chunk_size: {}
  connect_timeout_secs: 2
"#,
        chunk_size
    )
    .unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("health-check"))
        .stdout(predicate::str::contains("columns"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--chunk-size"))
        .stdout(predicate::str::contains("--on-chunk-error"))
        .stdout(predicate::str::contains("--source-schema"))
        .stdout(predicate::str::contains("--source-table"))
        .stdout(predicate::str::contains("--target-schema"))
        .stdout(predicate::str::contains("--target-table"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pg-table-migrate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_output_json_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"));
}

#[test]
fn test_log_file_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-file"));
}

#[test]
fn test_password_flags_read_environment() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("PGTM_SOURCE_PASSWORD"))
        .stdout(predicate::str::contains("PGTM_TARGET_PASSWORD"));
}

#[test]
fn test_log_format_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"));
}

#[test]
fn test_verbosity_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_invalid_policy_is_rejected_by_parser() {
    cmd()
        .args(["run", "--on-chunk-error", "retry"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

// =============================================================================
// Exit Code Tests - Config Errors (Exit Code 1)
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "columns"])
        .assert()
        .code(1);
}

#[test]
fn test_zero_chunk_size_in_config_exits_with_code_1() {
    let file = config_file(0);

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("chunk_size"));
}

#[test]
fn test_zero_chunk_size_override_aborts_before_connecting() {
    let file = config_file(500);

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "run",
            "--chunk-size",
            "0",
        ])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Migration aborted during init!"))
        .stdout(predicate::str::contains(
            "Chunks: 0 attempted, 0 committed, 0 failed",
        ));
}

#[test]
fn test_aborted_run_prints_json_summary() {
    let file = config_file(500);

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "--output-json",
            "run",
            "--chunk-size",
            "0",
        ])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("\"status\": \"aborted\""))
        .stdout(predicate::str::contains("\"rows_transferred\": 0"));
}

#[test]
fn test_log_file_receives_error_line() {
    let file = config_file(500);
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("migrator.log");

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "--log-file",
            log_path.to_str().unwrap(),
            "run",
            "--chunk-size",
            "0",
        ])
        .assert()
        .code(1);

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("Migration rejected"), "log was: {}", log);
    assert!(log.contains("ERROR"));
}

// =============================================================================
// Exit Code Tests - Connection Errors (Exit Code 2)
// =============================================================================

#[test]
fn test_unreachable_server_health_check_exits_with_code_2() {
    let file = config_file(500);

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("UNHEALTHY"));
}

#[test]
fn test_unreachable_server_run_exits_with_code_2() {
    let file = config_file(500);

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Migration aborted during connecting!"));
}
