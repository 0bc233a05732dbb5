//! Instruction interpreter: the only component that touches the repository.
//!
//! RUN spawns a fresh process without a shell, EDIT writes inside the repo
//! root only, META updates diagnostics. Each instruction yields exactly one
//! event, numbered consecutively from the caller's step id.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::core::sandbox::{is_strict_descendant, join_within, split_argv};
use crate::core::types::{
    EditPayload, Event, EventType, Instruction, JsonMap, MemoryMode, Program, RunPayload, State,
};
use crate::io::config::AgentConfig;
use crate::io::git::Git;
use crate::io::process::{SpawnFailed, run_command_with_timeout};
use crate::io::stamp::{new_id, now_secs};

/// Exit code recorded when a RUN times out.
pub const TIMEOUT_EXIT_CODE: i64 = -1;
/// Exit code recorded when a RUN program cannot be started.
pub const SPAWN_FAILURE_EXIT_CODE: i64 = 127;
const TIMEOUT_MARKER: &str = "\n[timeout expired]";

/// An instruction payload is unusable; the rest of the program is not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedInstruction {
    /// Position in the program.
    pub index: usize,
    pub kind: EventType,
    pub reason: String,
}

impl fmt::Display for MalformedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed {} instruction at index {}: {}",
            self.kind, self.index, self.reason
        )
    }
}

impl std::error::Error for MalformedInstruction {}

/// Executes programs against a job's repository.
#[derive(Debug, Clone)]
pub struct Interpreter {
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Interpreter {
    pub fn new(timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.run_timeout(), config.run_output_limit_bytes)
    }

    /// Run `program` in order, returning the updated state and one event per
    /// instruction.
    ///
    /// Only a [`MalformedInstruction`] is returned as an error. Command
    /// failures, timeouts and rejected edits are recorded in events and in
    /// `diagnostics.last_error`.
    #[instrument(skip_all, fields(job_id = %job_id, step_id, instructions = program.len()))]
    pub fn interpret(
        &self,
        state: &State,
        program: &Program,
        job_id: &str,
        step_id: u64,
    ) -> Result<(State, Vec<Event>)> {
        let mut state = state.clone();
        let mut events = Vec::with_capacity(program.len());
        for (index, instruction) in program.instructions.iter().enumerate() {
            let current_step = step_id + index as u64;
            let started_at = now_secs();
            let payload = match instruction {
                Instruction::Run(run) => self.apply_run(&mut state, run, index)?,
                Instruction::Edit(edit) => apply_edit(&mut state, edit, index)?,
                Instruction::Meta(meta) => apply_meta(&mut state, meta),
            };
            events.push(Event {
                event_id: new_id("evt"),
                job_id: job_id.to_string(),
                step_id: current_step,
                kind: instruction.kind(),
                payload,
                started_at,
                ended_at: now_secs(),
            });
        }
        refresh_git_head(&mut state);
        debug!(events = events.len(), "program interpreted");
        Ok((state, events))
    }

    fn apply_run(&self, state: &mut State, run: &RunPayload, index: usize) -> Result<JsonMap> {
        let argv = split_argv(&run.cmd).ok_or_else(|| MalformedInstruction {
            index,
            kind: EventType::Run,
            reason: "RUN requires a non-empty command with balanced quoting".to_string(),
        })?;
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]).current_dir(&state.repo_root);

        let (stdout, stderr, exit_code) =
            match run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes) {
                Ok(output) => {
                    let stdout = String::from_utf8_lossy(&output.stdout).into_owned()
                        + &output.stdout_truncated_notice();
                    let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned()
                        + &output.stderr_truncated_notice();
                    let exit_code = if output.timed_out {
                        stderr.push_str(TIMEOUT_MARKER);
                        TIMEOUT_EXIT_CODE
                    } else {
                        output.exit_code()
                    };
                    (stdout, stderr, exit_code)
                }
                Err(err) => {
                    let exit_code = if err.downcast_ref::<SpawnFailed>().is_some() {
                        SPAWN_FAILURE_EXIT_CODE
                    } else {
                        TIMEOUT_EXIT_CODE
                    };
                    warn!(cmd = %run.cmd, err = %format!("{err:#}"), "RUN could not complete");
                    (String::new(), format!("{err:#}"), exit_code)
                }
            };

        if exit_code != 0 {
            state.diagnostics.last_error =
                Some(format!("RUN failed (exit_code={exit_code}): {}", run.cmd));
        }
        let mut payload = JsonMap::new();
        payload.insert("cmd".to_string(), json!(run.cmd));
        payload.insert("stdout".to_string(), json!(stdout));
        payload.insert("stderr".to_string(), json!(stderr));
        payload.insert("exit_code".to_string(), json!(exit_code));
        Ok(payload)
    }
}

fn apply_edit(state: &mut State, edit: &EditPayload, index: usize) -> Result<JsonMap> {
    if edit.file_path.trim().is_empty() {
        return Err(MalformedInstruction {
            index,
            kind: EventType::Edit,
            reason: "EDIT requires a non-empty file_path".to_string(),
        }
        .into());
    }
    let mut payload = JsonMap::new();
    payload.insert("file_path".to_string(), json!(edit.file_path));
    match write_inside(&state.repo_root, &edit.file_path, &edit.content) {
        Ok(bytes_written) => {
            payload.insert("bytes_written".to_string(), json!(bytes_written));
        }
        Err(message) => {
            warn!(file_path = %edit.file_path, error = %message, "EDIT rejected");
            state.diagnostics.last_error = Some(message.clone());
            payload.insert("error".to_string(), json!(message));
        }
    }
    Ok(payload)
}

fn write_inside(repo_root: &Path, file_path: &str, content: &str) -> Result<usize, String> {
    let target = resolve_edit_target(repo_root, file_path)?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("create directory {}: {err}", parent.display()))?;
    }
    fs::write(&target, content).map_err(|err| format!("write {}: {err}", target.display()))?;
    Ok(content.len())
}

/// Resolve an EDIT target, following symlinks of the deepest existing ancestor.
///
/// Fails when the final path is not a strict descendant of the canonical root.
pub fn resolve_edit_target(repo_root: &Path, file_path: &str) -> Result<PathBuf, String> {
    const ESCAPES: &str = "EDIT path escapes repo_root";
    let root = repo_root
        .canonicalize()
        .map_err(|err| format!("resolve repo_root {}: {err}", repo_root.display()))?;
    let lexical = join_within(&root, file_path).ok_or_else(|| ESCAPES.to_string())?;

    let mut existing = lexical.as_path();
    let mut missing = Vec::new();
    while fs::symlink_metadata(existing).is_err() {
        let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
            return Err(ESCAPES.to_string());
        };
        missing.push(name.to_os_string());
        existing = parent;
    }
    let mut resolved = existing
        .canonicalize()
        .map_err(|err| format!("resolve {}: {err}", existing.display()))?;
    for name in missing.into_iter().rev() {
        resolved.push(name);
    }
    if is_strict_descendant(&root, &resolved) {
        Ok(resolved)
    } else {
        Err(ESCAPES.to_string())
    }
}

fn apply_meta(state: &mut State, meta: &JsonMap) -> JsonMap {
    if let Some(mode) = meta
        .get("memory_mode")
        .and_then(Value::as_str)
        .and_then(MemoryMode::parse)
    {
        state.diagnostics.memory_mode = mode;
    }
    if let Some(Value::String(last_error)) = meta.get("last_error") {
        state.diagnostics.last_error = Some(last_error.clone());
    }
    meta.clone()
}

fn refresh_git_head(state: &mut State) {
    match Git::new(&state.repo_root).head() {
        Ok(head) => state.git_head = head,
        Err(err) => debug!(err = %format!("{err:#}"), "git head refresh skipped"),
    }
}
