//! Per-step retrieval parameters and the planner's inputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::memory::{MemoryKind, MemoryStats};
use crate::core::views::{AgentMode, TaskType};

/// How wide the focus view should be for this step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusSpec {
    pub task_type: TaskType,
    /// Accepted but not applied as a filter.
    #[serde(default)]
    pub modules: Vec<String>,
    /// Accepted but not applied as a filter.
    #[serde(default = "default_true")]
    pub only_failing_tests: bool,
    #[serde(default = "default_max_focus_files")]
    pub max_focus_files: usize,
}

impl FocusSpec {
    pub fn for_task(task_type: TaskType) -> Self {
        Self {
            task_type,
            modules: Vec::new(),
            only_failing_tests: true,
            max_focus_files: default_max_focus_files(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_focus_files() -> usize {
    20
}

/// Selection policy handed to the memory selector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorProfile {
    /// Kind importance; biases order, never inclusion.
    #[serde(default)]
    pub weights: BTreeMap<MemoryKind, f64>,
    #[serde(default)]
    pub per_kind_limit: BTreeMap<MemoryKind, usize>,
    /// Exclusive floor on `stats.created_at` (unix seconds).
    #[serde(default)]
    pub recency_window: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankHints {
    #[serde(default)]
    pub boost_dimensions: Option<BTreeMap<String, f64>>,
    /// Accepted and currently ignored.
    #[serde(default)]
    pub diversity_over: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub prefer_recent: bool,
}

impl Default for RerankHints {
    fn default() -> Self {
        Self {
            boost_dimensions: None,
            diversity_over: None,
            prefer_recent: true,
        }
    }
}

/// The planner's sole output; fully determines one step's retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaPlan {
    pub focus_spec: FocusSpec,
    pub selector_profile: SelectorProfile,
    #[serde(default)]
    pub rerank_hints: Option<RerankHints>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalViewSummary {
    pub task_type: TaskType,
    pub natural_language_goal: String,
}

/// Cheap re-derivation of repository health from recent events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSummary {
    pub repo_size: u64,
    pub failing_tests_count: u64,
    pub key_modules: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Stuck,
    Flaky,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceHint {
    pub recent_steps: u64,
    pub last_status: StepStatus,
}

/// Everything the planner sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaInput {
    pub goal_view: GoalViewSummary,
    pub state_summary: StateSummary,
    pub memory_stats: MemoryStats,
    #[serde(default)]
    pub trace_hint: Option<TraceHint>,
    pub mode: AgentMode,
}
