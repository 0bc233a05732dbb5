//! Deterministic rule table mapping planner inputs to a [`MetaPlan`].

use std::collections::BTreeMap;

use crate::core::memory::MemoryKind;
use crate::core::plan::{FocusSpec, MetaInput, MetaPlan, RerankHints, SelectorProfile};
use crate::core::views::{AgentMode, TaskType};

/// Recency floor applied when memory is busy.
pub const RECENCY_WINDOW_SECS: i64 = 3600;
/// Activity score above which the recency floor kicks in.
pub const BUSY_ACTIVITY_SCORE: f64 = 5.0;
const BASELINE_KIND_LIMIT: usize = 10;

/// Build the canonical plan. `now` is unix seconds.
pub fn rule_plan(input: &MetaInput, now: i64) -> MetaPlan {
    let task_type = input.goal_view.task_type;
    let max_focus_files = match task_type {
        TaskType::FixFailures => 20,
        TaskType::InitProject => 10,
        TaskType::RunExperiments | TaskType::UpgradeRepo => 15,
    };
    let focus_spec = FocusSpec {
        task_type,
        modules: Vec::new(),
        only_failing_tests: task_type == TaskType::FixFailures,
        max_focus_files,
    };

    let per_kind_limit = BTreeMap::from([
        (MemoryKind::ErrorPattern, BASELINE_KIND_LIMIT),
        (MemoryKind::RunConfig, BASELINE_KIND_LIMIT),
    ]);
    let mut weights = BTreeMap::new();
    if input.state_summary.failing_tests_count > 0 {
        weights.insert(MemoryKind::ErrorPattern, 1.0);
    }
    let recency_window = (input.memory_stats.recent_activity_score > BUSY_ACTIVITY_SCORE)
        .then(|| now - RECENCY_WINDOW_SECS);

    let boost_dimensions = if input.mode == AgentMode::BootstrapLlmHeavy {
        BTreeMap::from([("layer".to_string(), 1.0)])
    } else {
        BTreeMap::new()
    };

    MetaPlan {
        focus_spec,
        selector_profile: SelectorProfile {
            weights,
            per_kind_limit,
            recency_window,
        },
        rerank_hints: Some(RerankHints {
            boost_dimensions: Some(boost_dimensions),
            diversity_over: None,
            prefer_recent: true,
        }),
    }
}
