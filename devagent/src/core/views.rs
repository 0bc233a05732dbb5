//! Views assembled for the decision maker after each step.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::memory::{MemoryItem, MemoryStats};
use crate::core::types::JsonMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    InitProject,
    FixFailures,
    RunExperiments,
    UpgradeRepo,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InitProject => "init_project",
            Self::FixFailures => "fix_failures",
            Self::RunExperiments => "run_experiments",
            Self::UpgradeRepo => "upgrade_repo",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "init_project" => Some(Self::InitProject),
            "fix_failures" => Some(Self::FixFailures),
            "run_experiments" => Some(Self::RunExperiments),
            "upgrade_repo" => Some(Self::UpgradeRepo),
            _ => None,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the controller obtains the program it executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Execute the caller's program directly.
    #[default]
    OptimizedStructured,
    /// Gather repository context and ask a generator for the program.
    BootstrapLlmHeavy,
}

impl AgentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OptimizedStructured => "optimized_structured",
            Self::BootstrapLlmHeavy => "bootstrap_llm_heavy",
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalView {
    pub task_type: TaskType,
    pub natural_language_goal: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateView {
    pub git_head: String,
    pub failing_tests: Vec<String>,
    pub repo_stats: JsonMap,
}

/// Working set of files, modules and tests judged relevant to the goal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusView {
    pub files: Vec<String>,
    pub modules: Vec<String>,
    pub tests: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryView {
    pub items: Vec<MemoryItem>,
    pub stats: Option<MemoryStats>,
}

/// Caller-provided feedback about the previous step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHints {
    #[serde(default)]
    pub last_step_outcome: Option<String>,
    #[serde(default)]
    pub consecutive_no_progress: u32,
}

/// Everything a decision maker needs for the next step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionContext {
    pub state_view: StateView,
    pub focus_view: FocusView,
    pub memory_view: MemoryView,
    pub goal_view: GoalView,
    pub hints: AgentHints,
    pub mode: AgentMode,
    pub token_budget_hint: Option<u64>,
}
