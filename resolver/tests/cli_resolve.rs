//! CLI tests for `resolver resolve`.
//!
//! Spawns the resolver binary against shell commands that need no package
//! manager and verifies exit codes and the persisted log.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::Command;

use resolver::exit_codes;
use resolver::io::config::{ResolverConfig, write_config};
use serde_json::{Value, json};

fn write_fixture(dir: &Path, diagnosis: &Value) {
    let cfg = ResolverConfig {
        command_pause_ms: 0,
        command_timeout_secs: 10,
        final_check: "true".to_string(),
        ..ResolverConfig::default()
    };
    write_config(&dir.join("resolver.toml"), &cfg).expect("write config");
    fs::write(
        dir.join("exectest1.json"),
        serde_json::to_string_pretty(diagnosis).expect("serialize"),
    )
    .expect("write diagnosis");
}

fn resolve(dir: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_resolver"))
        .current_dir(dir)
        .arg("resolve")
        .args(args)
        .output()
        .expect("resolver resolve")
}

fn read_log(dir: &Path) -> Value {
    let raw = fs::read_to_string(dir.join("resolution_log.json")).expect("read log");
    serde_json::from_str(&raw).expect("parse log")
}

#[test]
fn verified_solution_exits_ok() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_fixture(
        temp.path(),
        &json!({
            "overall_status": "needs_attention",
            "summary": "demo conflict",
            "recommended_solutions": [
                {"solution_type": "commands", "priority": 2, "description": "works",
                 "commands": ["echo installed"], "verification_command": "true"},
                {"solution_type": "commands", "priority": 1, "description": "breaks",
                 "commands": ["echo 'ERROR: dependency conflict'"]}
            ]
        }),
    );

    let output = resolve(temp.path(), &["--no-ai"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("summary: demo conflict"), "{stdout}");
    let log = read_log(temp.path());
    assert_eq!(log["resolution_status"], "SOLVED");
    assert_eq!(log["solution_history"][0]["description"], "breaks");
    // echo exits 0, but the error marker still fails the first solution.
    assert_eq!(log["execution_log"][0]["exit_code"], 0);
    assert_eq!(log["execution_log"][0]["success"], false);
}

#[test]
fn failing_queue_without_ai_exits_unsolved() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_fixture(
        temp.path(),
        &json!({
            "overall_status": "needs_attention",
            "recommended_solutions": [
                {"solution_type": "commands", "commands": ["false"]}
            ]
        }),
    );

    let output = resolve(temp.path(), &["--no-ai", "--log", "logs/run.json"]);

    assert_eq!(output.status.code(), Some(exit_codes::UNSOLVED));
    let raw = fs::read_to_string(temp.path().join("logs/run.json")).expect("read log");
    let log: Value = serde_json::from_str(&raw).expect("parse log");
    assert_eq!(log["resolution_status"], "INCOMPLETE");
    assert_eq!(log["terminal_state"], "EXHAUSTED");
    assert_eq!(log["iterations"], 1);
}

#[test]
fn success_diagnosis_exits_ok_without_running_commands() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_fixture(temp.path(), &json!({"data": {"llm": {"overall_status": "success"}}}));

    let output = resolve(temp.path(), &[]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(read_log(temp.path())["total_commands"], 0);
}

#[test]
fn invalid_diagnosis_is_fatal_and_writes_no_log() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_fixture(temp.path(), &json!({"error": "oracle unavailable"}));

    let output = resolve(temp.path(), &[]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("schema validation failed"), "{stderr}");
    assert!(!temp.path().join("resolution_log.json").exists());
}

#[test]
fn missing_diagnosis_file_is_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = resolve(temp.path(), &["nope.json"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(!temp.path().join("resolution_log.json").exists());
}
