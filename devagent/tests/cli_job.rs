//! CLI tests for `devagent job` commands.
//!
//! Spawns the devagent binary and verifies exit codes and output.

use std::fs;
use std::process::Command;

use devagent::exit_codes;
use serde_json::Value;

fn devagent(dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_devagent"));
    cmd.current_dir(dir);
    cmd
}

#[test]
fn step_on_unknown_job_exits_with_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("program.json"), r#"{"instructions": []}"#).expect("write");

    let status = devagent(temp.path())
        .args(["job", "step", "job-missing", "--program", "program.json"])
        .status()
        .expect("devagent job step");

    assert_eq!(status.code(), Some(exit_codes::NOT_FOUND));
}

#[test]
fn create_then_step_prints_result_json() {
    let temp = tempfile::tempdir().expect("tempdir");
    let repo = temp.path().join("repo");
    fs::create_dir_all(&repo).expect("repo dir");

    let status = devagent(temp.path())
        .arg("init")
        .status()
        .expect("devagent init");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert!(temp.path().join(".devagent/config.toml").is_file());

    let created = devagent(temp.path())
        .args(["job", "create", "--repo", "repo", "--task-type", "fix_failures"])
        .args(["--goal", "fix the build"])
        .output()
        .expect("devagent job create");
    assert_eq!(created.status.code(), Some(exit_codes::OK));
    let job_id = String::from_utf8(created.stdout).expect("utf8").trim().to_string();
    assert!(job_id.starts_with("job-"));

    fs::write(
        temp.path().join("program.json"),
        r#"{"instructions": [{"kind": "RUN", "payload": {"cmd": "false"}}]}"#,
    )
    .expect("write program");
    let stepped = devagent(temp.path())
        .args(["job", "step", &job_id, "--program", "program.json"])
        .output()
        .expect("devagent job step");
    assert_eq!(stepped.status.code(), Some(exit_codes::OK));

    let result: Value = serde_json::from_slice(&stepped.stdout).expect("json");
    assert_eq!(result["events"].as_array().map(Vec::len), Some(1));
    assert_eq!(
        result["state"]["diagnostics"]["last_error"],
        "RUN failed (exit_code=1): false"
    );
    assert_eq!(result["origins"]["plan"]["source"], "fallback");
}

#[test]
fn invalid_program_exits_with_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(temp.path().join("repo")).expect("repo dir");
    let created = devagent(temp.path())
        .args(["job", "create", "--repo", "repo", "--task-type", "init_project"])
        .args(["--goal", "start"])
        .output()
        .expect("devagent job create");
    let job_id = String::from_utf8(created.stdout).expect("utf8").trim().to_string();

    fs::write(
        temp.path().join("program.json"),
        r#"{"instructions": [{"kind": "SHELL", "payload": {"cmd": "ls"}}]}"#,
    )
    .expect("write program");
    let status = devagent(temp.path())
        .args(["job", "step", &job_id, "--program", "program.json"])
        .status()
        .expect("devagent job step");
    assert_eq!(status.code(), Some(exit_codes::INVALID));

    let status = devagent(temp.path())
        .args(["job", "create", "--repo", "repo", "--task-type", "refactor", "--goal", "x"])
        .status()
        .expect("devagent job create");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}
