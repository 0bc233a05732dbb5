//! Meta controller: plan, execute, remember and trace one job step.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::focus::{infer_baseline, merge_focus};
use crate::core::memory::MemoryItem;
use crate::core::plan::{GoalViewSummary, MetaInput, MetaPlan, StateSummary};
use crate::core::types::{Event, FallbackReason, JsonMap, Origin, Program, Sourced, State, TraceEntry};
use crate::core::views::{
    AgentHints, AgentMode, DecisionContext, FocusView, GoalView, MemoryView, StateView,
};
use crate::io::capability::Capabilities;
use crate::io::config::AgentConfig;
use crate::io::ingest::MemoryIngest;
use crate::io::interpret::Interpreter;
use crate::io::prompt::{BootstrapInputs, render_bootstrap};
use crate::io::recorder::Recorder;
use crate::io::repo_context::{focus_file_contents, recent_failures, repo_tree};
use crate::io::schema::{PROGRAM_SCHEMA, validate_json};
use crate::io::stamp::new_id;
use crate::io::store::Stores;
use crate::planner::MetaPlanner;
use crate::retrieval::{FocusViewBuilder, MemoryReranker, MemorySelector};

/// Where each capability-backed part of a step came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepOrigins {
    pub plan: Origin,
    pub rerank: Origin,
    /// `None` when the caller's program ran directly (structured mode).
    pub program: Option<Origin>,
}

/// Everything one step produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub state: State,
    pub events: Vec<Event>,
    pub decision: DecisionContext,
    pub origins: StepOrigins,
}

pub struct MetaController {
    config: AgentConfig,
    stores: Stores,
    capabilities: Capabilities,
    interpreter: Interpreter,
}

/// Per-step retrieval built from the plan.
struct Retrieval<'a> {
    selector: MemorySelector<'a>,
    reranker: MemoryReranker<'a>,
}

/// The views handed to whoever decides the next step, plus how the memory
/// order was obtained.
struct Views {
    focus: FocusView,
    memory: MemoryView,
    rerank: Origin,
}

impl MetaController {
    pub fn new(config: AgentConfig, stores: Stores, capabilities: Capabilities) -> Self {
        let interpreter = Interpreter::from_config(&config);
        Self {
            config,
            stores,
            capabilities,
            interpreter,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Run one step for `job_id` starting at `start_step_id`.
    ///
    /// Exactly one trace entry is appended per successful call. A malformed
    /// instruction aborts the step before anything is recorded.
    #[instrument(skip_all, fields(job_id = %job_id, start_step_id, mode = %self.config.mode))]
    pub fn run_step(
        &self,
        job_id: &str,
        state: &State,
        program: &Program,
        goal: &GoalView,
        hints: Option<&AgentHints>,
        start_step_id: u64,
    ) -> Result<StepResult> {
        let recent = self
            .stores
            .events
            .recent_for_job(job_id, self.config.recent_events_limit)
            .context("read recent events")?;
        let meta_input = MetaInput {
            goal_view: GoalViewSummary {
                task_type: goal.task_type,
                natural_language_goal: goal.natural_language_goal.clone(),
            },
            state_summary: summarize_state(&recent),
            memory_stats: self.stores.memory.stats().context("read memory stats")?,
            trace_hint: None,
            mode: self.config.mode,
        };
        let planned = MetaPlanner::new(self.capabilities.planner.as_ref()).propose_plan(&meta_input);
        let plan = &planned.value;
        let hints = hints.cloned().unwrap_or_default();

        let retrieval = Retrieval {
            selector: MemorySelector::new(
                self.stores.memory.as_ref(),
                self.capabilities.index.as_ref(),
                self.config.candidate_scan_limit,
            ),
            reranker: MemoryReranker::new(
                self.capabilities.ranker.as_ref(),
                self.config.rerank_min_external_items,
            ),
        };

        let (new_state, events, decision, executed, program_origin, rerank_origin) =
            match self.config.mode {
                AgentMode::OptimizedStructured => {
                    let (new_state, events) = self.execute(state, program, job_id, start_step_id)?;
                    let baseline = infer_baseline(&events);
                    let views = self.build_views(&retrieval, plan, baseline.clone())?;
                    let decision = DecisionContext {
                        state_view: StateView {
                            git_head: new_state.git_head.clone(),
                            failing_tests: baseline.tests,
                            repo_stats: JsonMap::new(),
                        },
                        focus_view: views.focus,
                        memory_view: views.memory,
                        goal_view: goal.clone(),
                        hints,
                        mode: self.config.mode,
                        token_budget_hint: None,
                    };
                    (new_state, events, decision, program.clone(), None, views.rerank)
                }
                AgentMode::BootstrapLlmHeavy => {
                    let baseline = infer_baseline(&recent);
                    let views = self.build_views(&retrieval, plan, FocusView::default())?;
                    let prompt = self.bootstrap_prompt(state, goal, &recent, &views)?;
                    let decision = DecisionContext {
                        state_view: StateView {
                            git_head: state.git_head.clone(),
                            failing_tests: baseline.tests,
                            repo_stats: JsonMap::new(),
                        },
                        focus_view: views.focus,
                        memory_view: views.memory,
                        goal_view: goal.clone(),
                        hints,
                        mode: self.config.mode,
                        token_budget_hint: None,
                    };
                    let generated = self.generate_program(&prompt, program);
                    let (new_state, events) =
                        self.execute(state, &generated.value, job_id, start_step_id)?;
                    (
                        new_state,
                        events,
                        decision,
                        generated.value,
                        Some(generated.origin),
                        views.rerank,
                    )
                }
            };

        let trace = TraceEntry {
            decision_id: new_id("decision"),
            job_id: job_id.to_string(),
            step_id: events
                .iter()
                .map(|event| event.step_id)
                .max()
                .unwrap_or(start_step_id),
            decision_input_summary: summary_map(json!({
                "goal_task_type": decision.goal_view.task_type,
                "files": decision.focus_view.files,
                "mode": decision.mode,
            })),
            program_summary: summary_map(json!({"instruction_count": executed.len()})),
            outcome_summary: summary_map(json!({
                "event_count": events.len(),
                "git_head": new_state.git_head,
                "rerank_hints": plan.rerank_hints,
            })),
        };
        Recorder::new(&self.stores).record_trace(&trace)?;

        info!(
            events = events.len(),
            step_id = trace.step_id,
            last_error = ?new_state.diagnostics.last_error,
            "step finished"
        );
        Ok(StepResult {
            state: new_state,
            events,
            decision,
            origins: StepOrigins {
                plan: planned.origin,
                rerank: rerank_origin,
                program: program_origin,
            },
        })
    }

    /// Interpret, record and ingest one program.
    fn execute(
        &self,
        state: &State,
        program: &Program,
        job_id: &str,
        start_step_id: u64,
    ) -> Result<(State, Vec<Event>)> {
        let (new_state, events) = self
            .interpreter
            .interpret(state, program, job_id, start_step_id)?;
        Recorder::new(&self.stores).record_events(&events)?;
        let report = MemoryIngest::new(self.stores.memory.as_ref()).ingest(&events);
        debug!(
            upserted = report.upserted,
            failed = report.failed,
            "step events ingested"
        );
        Ok((new_state, events))
    }

    /// Focus (seeded with `baseline`) and the memory view for the next
    /// decision.
    fn build_views(
        &self,
        retrieval: &Retrieval<'_>,
        plan: &MetaPlan,
        baseline: FocusView,
    ) -> Result<Views> {
        let hints = plan.rerank_hints.as_ref();
        let memory_focus = FocusViewBuilder::new(&retrieval.selector, &retrieval.reranker).build(
            &plan.focus_spec,
            &plan.selector_profile,
            hints,
            None,
        )?;
        let selected = retrieval.selector.select(
            &plan.selector_profile,
            None,
            None,
            Some(self.config.memory_view_limit),
        )?;
        let ranked = retrieval.reranker.rerank(selected, hints);
        Ok(Views {
            focus: merge_focus(baseline, memory_focus),
            memory: MemoryView {
                items: ranked.value,
                stats: Some(self.stores.memory.stats().context("read memory stats")?),
            },
            rerank: ranked.origin,
        })
    }

    fn bootstrap_prompt(
        &self,
        state: &State,
        goal: &GoalView,
        recent: &[Event],
        views: &Views,
    ) -> Result<String> {
        let bounds = &self.config.bootstrap;
        let tree = repo_tree(&state.repo_root, bounds.tree_max_depth);
        let failures = recent_failures(recent, bounds.failure_limit, bounds.failure_max_chars);
        let files = focus_file_contents(
            &state.repo_root,
            &views.focus.files,
            bounds.focus_file_max_chars,
        );
        let highlights: &[MemoryItem] = &views.memory.items
            [..views.memory.items.len().min(bounds.memory_highlights)];
        render_bootstrap(&BootstrapInputs {
            goal: &goal.natural_language_goal,
            repo_tree: &tree,
            recent_failures: &failures,
            highlights,
            focus_files: &files,
        })
    }

    /// Ask the generator for a program; the caller's program stands in for
    /// any missing or invalid answer.
    fn generate_program(&self, prompt: &str, fallback: &Program) -> Sourced<Program> {
        let response = match self.capabilities.generator.generate(prompt) {
            Ok(Some(response)) => response,
            Ok(None) => return Sourced::fallback(fallback.clone(), FallbackReason::NoAnswer),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "program generator failed");
                return Sourced::fallback(fallback.clone(), FallbackReason::Failed);
            }
        };
        match parse_program(response) {
            Ok(program) => {
                debug!(instructions = program.len(), "generated program accepted");
                Sourced::external(program)
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "discarding invalid generated program");
                Sourced::fallback(fallback.clone(), FallbackReason::Invalid)
            }
        }
    }
}

fn parse_program(response: Value) -> Result<Program> {
    validate_json("program", PROGRAM_SCHEMA, &response)?;
    serde_json::from_value(response).context("decode generated program")
}

/// Failing RUN count over the job's recent events.
fn summarize_state(recent: &[Event]) -> StateSummary {
    StateSummary {
        repo_size: 0,
        failing_tests_count: recent.iter().filter(|event| event.is_failed_run()).count() as u64,
        key_modules: Vec::new(),
    }
}

fn summary_map(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::MemoryKind;
    use crate::core::types::Instruction;
    use crate::core::views::TaskType;
    use crate::test_support::{ScriptedGenerator, TestRepo};
    use anyhow::anyhow;

    fn goal() -> GoalView {
        GoalView {
            task_type: TaskType::FixFailures,
            natural_language_goal: "make the build green".to_string(),
        }
    }

    fn controller(mode: AgentMode, capabilities: Capabilities) -> MetaController {
        let config = AgentConfig {
            mode,
            ..AgentConfig::default()
        };
        MetaController::new(config, Stores::in_memory(), capabilities)
    }

    #[test]
    fn structured_step_records_ingests_and_traces() {
        let repo = TestRepo::new().expect("repo");
        let controller = controller(AgentMode::OptimizedStructured, Capabilities::default());
        let program = Program::new(vec![
            Instruction::edit("src/lib.rs", "pub fn f() {}\n"),
            Instruction::run("sh -c 'echo src/lib.rs:1 broken >&2; exit 1'"),
        ]);

        let result = controller
            .run_step("job", &repo.state(), &program, &goal(), None, 1)
            .expect("step");

        assert_eq!(result.events.len(), 2);
        assert_eq!(result.decision.focus_view.files, vec!["src/lib.rs"]);
        assert_eq!(result.decision.memory_view.items.len(), 2);
        assert_eq!(result.origins.program, None);
        assert_eq!(result.origins.plan, Origin::Fallback(FallbackReason::NoAnswer));
        assert_eq!(
            result.decision.memory_view.stats.as_ref().map(|s| s.total()),
            Some(2)
        );

        let traces = controller.stores().traces.recent_for_job("job", 10).expect("traces");
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].step_id, 2);
        assert_eq!(traces[0].program_summary["instruction_count"], 2);
        assert_eq!(traces[0].outcome_summary["event_count"], 2);
        assert_eq!(traces[0].decision_input_summary["goal_task_type"], "fix_failures");
        let kinds = controller
            .stores()
            .memory
            .stats()
            .expect("stats")
            .counts_by_kind;
        assert_eq!(kinds.get(MemoryKind::ErrorPattern.as_str()), Some(&1));
    }

    #[test]
    fn empty_program_still_traces_at_start_step() {
        let repo = TestRepo::new().expect("repo");
        let controller = controller(AgentMode::OptimizedStructured, Capabilities::default());
        let result = controller
            .run_step("job", &repo.state(), &Program::default(), &goal(), None, 7)
            .expect("step");
        assert!(result.events.is_empty());
        let traces = controller.stores().traces.recent_for_job("job", 10).expect("traces");
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].step_id, 7);
    }

    #[test]
    fn malformed_program_aborts_without_trace() {
        let repo = TestRepo::new().expect("repo");
        let controller = controller(AgentMode::OptimizedStructured, Capabilities::default());
        let program = Program::new(vec![Instruction::run("   ")]);
        assert!(
            controller
                .run_step("job", &repo.state(), &program, &goal(), None, 1)
                .is_err()
        );
        let traces = controller.stores().traces.recent_for_job("job", 10).expect("traces");
        assert!(traces.is_empty());
    }

    #[test]
    fn bootstrap_runs_the_generated_program() {
        let repo = TestRepo::new().expect("repo");
        repo.write("README.md", "hello\n").expect("write");
        let generator = ScriptedGenerator::answering(Ok(Some(json!({
            "instructions": [{"kind": "EDIT", "payload": {"file_path": "notes.txt", "content": "hi"}}]
        }))));
        let capabilities = Capabilities {
            generator: Box::new(generator.clone()),
            ..Capabilities::default()
        };
        let controller = controller(AgentMode::BootstrapLlmHeavy, capabilities);
        let caller_program = Program::new(vec![Instruction::run("true")]);

        let result = controller
            .run_step("job", &repo.state(), &caller_program, &goal(), None, 1)
            .expect("step");

        assert_eq!(result.origins.program, Some(Origin::External));
        assert_eq!(result.events.len(), 1);
        assert_eq!(repo.read("notes.txt").expect("read"), "hi");
        let prompts = generator.requests();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("Goal: make the build green"));
        assert!(prompts[0].contains("- README.md"));
        assert_eq!(result.decision.mode, AgentMode::BootstrapLlmHeavy);
    }

    #[test]
    fn bootstrap_falls_back_to_the_caller_program() {
        let repo = TestRepo::new().expect("repo");
        let invalid = ScriptedGenerator::answering(Ok(Some(json!({"instructions": [{"kind": "SHELL"}]}))));
        let capabilities = Capabilities {
            generator: Box::new(invalid),
            ..Capabilities::default()
        };
        let invalid_ctl = controller(AgentMode::BootstrapLlmHeavy, capabilities);
        let program = Program::new(vec![Instruction::run("true")]);
        let result = invalid_ctl
            .run_step("job", &repo.state(), &program, &goal(), None, 1)
            .expect("step");
        assert_eq!(
            result.origins.program,
            Some(Origin::Fallback(FallbackReason::Invalid))
        );
        assert_eq!(result.events[0].payload_str("cmd"), Some("true"));

        let failing = ScriptedGenerator::answering(Err(anyhow!("model offline")));
        let capabilities = Capabilities {
            generator: Box::new(failing),
            ..Capabilities::default()
        };
        let failing_ctl = controller(AgentMode::BootstrapLlmHeavy, capabilities);
        let result = failing_ctl
            .run_step("job", &repo.state(), &program, &goal(), None, 1)
            .expect("step");
        assert_eq!(
            result.origins.program,
            Some(Origin::Fallback(FallbackReason::Failed))
        );
    }
}
