//! Shared deterministic types for the execution core.
//!
//! These types define the wire contract at the instruction/event boundary.
//! They must not depend on external state or I/O.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON object used for open payloads, pointers, dimensions and stats.
///
/// `serde_json::Map` is ordered by key, which keeps serialized output stable.
pub type JsonMap = serde_json::Map<String, Value>;

/// Health of the memory subsystem as last reported by a META instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryMode {
    #[default]
    Ok,
    DegradedPartial,
    Down,
}

impl MemoryMode {
    /// Parse a wire value, returning `None` for anything outside the closed set.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "OK" => Some(Self::Ok),
            "DEGRADED_PARTIAL" => Some(Self::DegradedPartial),
            "DOWN" => Some(Self::Down),
            _ => None,
        }
    }
}

/// The only part of [`State`] that instructions may alter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    #[serde(default)]
    pub memory_mode: MemoryMode,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Per-job repository state. Owned by exactly one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub git_head: String,
    pub repo_root: PathBuf,
    #[serde(default = "default_config_profile")]
    pub config_profile: String,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

fn default_config_profile() -> String {
    "default".to_string()
}

impl State {
    /// Fresh state with an empty head, as created for a new job.
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            git_head: String::new(),
            repo_root: repo_root.into(),
            config_profile: default_config_profile(),
            diagnostics: Diagnostics::default(),
        }
    }
}

/// Payload of a RUN instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPayload {
    pub cmd: String,
}

/// Payload of an EDIT instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditPayload {
    pub file_path: String,
    #[serde(default)]
    pub content: String,
}

/// One atomic unit of work.
///
/// Unknown kinds and missing required payload fields fail deserialization, so
/// they never reach the interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum Instruction {
    #[serde(rename = "RUN")]
    Run(RunPayload),
    #[serde(rename = "EDIT")]
    Edit(EditPayload),
    /// Open map; only `memory_mode` and `last_error` are interpreted.
    #[serde(rename = "META")]
    Meta(JsonMap),
}

impl Instruction {
    pub fn run(cmd: impl Into<String>) -> Self {
        Self::Run(RunPayload { cmd: cmd.into() })
    }

    pub fn edit(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Edit(EditPayload {
            file_path: file_path.into(),
            content: content.into(),
        })
    }

    pub fn meta(payload: JsonMap) -> Self {
        Self::Meta(payload)
    }

    pub fn kind(&self) -> EventType {
        match self {
            Self::Run(_) => EventType::Run,
            Self::Edit(_) => EventType::Edit,
            Self::Meta(_) => EventType::Meta,
        }
    }
}

/// Ordered batch of instructions executed as one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub instructions: Vec<Instruction>,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Run,
    Edit,
    Meta,
    System,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Run => "RUN",
            Self::Edit => "EDIT",
            Self::Meta => "META",
            Self::System => "SYSTEM",
        };
        f.write_str(name)
    }
}

/// Immutable record of one instruction's execution outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub job_id: String,
    pub step_id: u64,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub payload: JsonMap,
    /// Unix seconds.
    pub started_at: f64,
    /// Unix seconds.
    pub ended_at: f64,
}

impl Event {
    /// Exit code of a RUN event; `0` when absent or null.
    ///
    /// Returns `None` when the field holds something other than an integer.
    pub fn exit_code(&self) -> Option<i64> {
        match self.payload.get("exit_code") {
            None | Some(Value::Null) => Some(0),
            Some(value) => value.as_i64(),
        }
    }

    /// True for RUN events whose exit code is a nonzero integer.
    pub fn is_failed_run(&self) -> bool {
        self.kind == EventType::Run && self.exit_code().is_some_and(|code| code != 0)
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// Records kept in per-job append-only journals.
pub trait JobRecord {
    fn job_id(&self) -> &str;
    fn step_id(&self) -> u64;
}

impl JobRecord for Event {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn step_id(&self) -> u64 {
        self.step_id
    }
}

/// Audit record of one controller step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub decision_id: String,
    pub job_id: String,
    pub step_id: u64,
    pub decision_input_summary: JsonMap,
    pub program_summary: JsonMap,
    pub outcome_summary: JsonMap,
}

impl JobRecord for TraceEntry {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn step_id(&self) -> u64 {
        self.step_id
    }
}

/// Why a local fallback stood in for an external capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Not consulted for this call.
    Skipped,
    /// Consulted and gave no answer; this includes an unavailable capability.
    NoAnswer,
    /// The call itself failed.
    Failed,
    /// The answer failed validation or named nothing usable.
    Invalid,
}

/// Provenance of a capability-backed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source", content = "reason")]
pub enum Origin {
    External,
    Fallback(FallbackReason),
}

/// A value together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub origin: Origin,
}

impl<T> Sourced<T> {
    pub fn external(value: T) -> Self {
        Self {
            value,
            origin: Origin::External,
        }
    }

    pub fn fallback(value: T, reason: FallbackReason) -> Self {
        Self {
            value,
            origin: Origin::Fallback(reason),
        }
    }
}
