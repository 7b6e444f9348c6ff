//! End-to-end tests of the `spindle` binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const TRACE: &str = r#"{
    "vocabulary": ["<pad>", "</s>", "<unk>", "<s>", "hello", "world", "again"],
    "eos_token_id": 1,
    "prompt": "hello",
    "base_score": -10.0,
    "steps": [{"5": 4.0}, {"6": 4.0}, {"1": 6.0}]
}"#;

fn spindle(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("spindle").unwrap();
    // Keep a user config from leaking into the tests
    cmd.env("SPINDLE_CONFIG", dir.path().join("config.toml"));
    fs::write(dir.path().join("config.toml"), "").unwrap();
    cmd
}

#[test]
fn test_check_valid_policy() {
    let dir = TempDir::new().unwrap();
    let policy = dir.path().join("greedy.toml");
    fs::write(&policy, "temperature = 0.0\nmax_output_tokens = 16\n").unwrap();

    spindle(&dir)
        .args(["--json", "check"])
        .arg(&policy)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"is_greedy\": true"));
}

#[test]
fn test_check_rejects_out_of_range_policy() {
    let dir = TempDir::new().unwrap();
    let policy = dir.path().join("bad.toml");
    fs::write(&policy, "top_p = 1.5\n").unwrap();

    spindle(&dir)
        .arg("check")
        .arg(&policy)
        .assert()
        .failure()
        .stderr(predicate::str::contains("top_p"));
}

#[test]
fn test_replay_greedy_trace() {
    let dir = TempDir::new().unwrap();
    let trace = dir.path().join("trace.json");
    let policy = dir.path().join("greedy.toml");
    fs::write(&trace, TRACE).unwrap();
    fs::write(&policy, "temperature = 0.0\n").unwrap();

    spindle(&dir)
        .args(["--json", "replay"])
        .arg(&trace)
        .arg("--policy")
        .arg(&policy)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"text\": \"world again\""))
        .stdout(predicate::str::contains("\"finish_reason\": \"end_of_sequence\""));
}

#[test]
fn test_replay_streams_fragments() {
    let dir = TempDir::new().unwrap();
    let trace = dir.path().join("trace.json");
    let policy = dir.path().join("greedy.toml");
    fs::write(&trace, TRACE).unwrap();
    fs::write(&policy, "temperature = 0.0\n").unwrap();

    spindle(&dir)
        .args(["replay", "--stream", "--policy"])
        .arg(&policy)
        .arg(&trace)
        .assert()
        .success()
        .stdout(predicate::str::contains("world again"));
}

#[test]
fn test_replay_uses_configured_default_policy() {
    let dir = TempDir::new().unwrap();
    let trace = dir.path().join("trace.json");
    let policy = dir.path().join("greedy.toml");
    fs::write(&trace, TRACE).unwrap();
    fs::write(&policy, "temperature = 0.0\nmax_output_tokens = 1\n").unwrap();

    let mut cmd = spindle(&dir);
    fs::write(
        dir.path().join("config.toml"),
        format!("default_policy = {:?}\n", policy.display().to_string()),
    )
    .unwrap();

    cmd.args(["--json", "replay"])
        .arg(&trace)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"finish_reason\": \"max_tokens\""));
}
