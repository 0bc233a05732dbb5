//! End-to-end scenarios through the task runner.
//!
//! These tests drive `TaskRunner::run_step` against real stores and real
//! subprocesses to verify the documented step-level guarantees.

use std::sync::Arc;

use devagent::controller::MetaController;
use devagent::core::memory::MemoryKind;
use devagent::core::types::{
    Event, EventType, FallbackReason, Instruction, MemoryMode, Origin, Program, TraceEntry,
};
use devagent::core::views::{AgentMode, GoalView, TaskType};
use devagent::io::capability::Capabilities;
use devagent::io::config::AgentConfig;
use devagent::io::jobs::{FileJobs, InMemoryJobs};
use devagent::io::store::{InMemoryJournal, InMemoryMemoryStore, Stores};
use devagent::task::{JobNotFound, TaskRunner};
use devagent::test_support::{ScriptedGenerator, ScriptedRanker, TestRepo};
use serde_json::json;

fn goal(task_type: TaskType) -> GoalView {
    GoalView {
        task_type,
        natural_language_goal: "get the suite passing".to_string(),
    }
}

fn in_memory_runner(config: AgentConfig, capabilities: Capabilities) -> TaskRunner {
    TaskRunner::new(
        MetaController::new(config, Stores::in_memory(), capabilities),
        Box::new(InMemoryJobs::new()),
    )
}

/// A failing RUN on an empty repository leaves one RUN event, one
/// error_pattern memory item and a last_error naming the exit code.
#[test]
fn failing_run_on_empty_repo_is_remembered() {
    let repo = TestRepo::new().expect("repo");
    let runner = in_memory_runner(AgentConfig::default(), Capabilities::default());
    let job_id = runner
        .create_job(repo.path(), goal(TaskType::FixFailures))
        .expect("create");

    let result = runner
        .run_step(&job_id, &Program::new(vec![Instruction::run("false")]), None)
        .expect("step");

    let last_error = result
        .state
        .diagnostics
        .last_error
        .as_deref()
        .expect("last_error");
    assert!(last_error.contains("exit_code=1"));

    let stores = runner.controller().stores();
    let events = stores.events.recent_for_job(&job_id, 100).expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventType::Run);

    let stats = stores.memory.stats().expect("stats");
    assert_eq!(stats.total(), 1);
    assert_eq!(stats.counts_by_kind.get(MemoryKind::ErrorPattern.as_str()), Some(&1));
}

/// Two sequential steps advance the step ids and never shrink any store.
#[test]
fn sequential_steps_grow_monotonically() {
    let repo = TestRepo::new().expect("repo");
    let runner = in_memory_runner(AgentConfig::default(), Capabilities::default());
    let job_id = runner
        .create_job(repo.path(), goal(TaskType::RunExperiments))
        .expect("create");
    let stores = runner.controller().stores().clone();
    let counts = || {
        (
            stores.events.recent_for_job(&job_id, 1000).expect("events").len(),
            stores.traces.recent_for_job(&job_id, 1000).expect("traces").len(),
            stores.memory.stats().expect("stats").total(),
        )
    };

    let program = Program::new(vec![
        Instruction::edit("src/main.rs", "fn main() {}\n"),
        Instruction::run("ls src"),
    ]);
    let first = runner.run_step(&job_id, &program, None).expect("first");
    let after_first = counts();
    let second = runner.run_step(&job_id, &program, None).expect("second");
    let after_second = counts();

    let max_step = |events: &[Event]| {
        events.iter().map(|event| event.step_id).max().expect("events")
    };
    assert!(max_step(&second.events) > max_step(&first.events));
    assert!(after_second.0 >= after_first.0);
    assert!(after_second.1 >= after_first.1);
    assert!(after_second.2 >= after_first.2);
    assert_eq!(after_second, (4, 2, 4));
}

/// Edits that escape the repository are recorded, not written, and the
/// program keeps going.
#[test]
fn escaping_edit_is_contained() {
    let repo = TestRepo::new().expect("repo");
    let runner = in_memory_runner(AgentConfig::default(), Capabilities::default());
    let job_id = runner
        .create_job(repo.path(), goal(TaskType::InitProject))
        .expect("create");

    let program = Program::new(vec![
        Instruction::edit("../escaped.txt", "nope"),
        Instruction::edit("kept.txt", "yes"),
    ]);
    let result = runner.run_step(&job_id, &program, None).expect("step");

    assert!(!repo.outside().join("escaped.txt").exists());
    assert!(result.events[0].payload.contains_key("error"));
    assert_eq!(repo.read("kept.txt").expect("read"), "yes");
    assert!(result.decision.focus_view.files.contains(&"kept.txt".to_string()));
    assert!(
        !result
            .decision
            .focus_view
            .files
            .contains(&"../escaped.txt".to_string())
    );
}

/// Unknown jobs surface as a distinguishable not-found error.
#[test]
fn unknown_job_is_not_found() {
    let runner = in_memory_runner(AgentConfig::default(), Capabilities::default());
    let err = runner
        .run_step("job-20240101-unknown", &Program::default(), None)
        .unwrap_err();
    assert!(err.downcast_ref::<JobNotFound>().is_some());
}

/// Bootstrap mode executes the generated program and still traces once.
#[test]
fn bootstrap_mode_uses_generated_program() {
    let repo = TestRepo::with_git().expect("repo");
    let generator = ScriptedGenerator::answering(Ok(Some(json!({
        "instructions": [
            {"kind": "RUN", "payload": {"cmd": "git status --short"}},
            {"kind": "META", "payload": {"memory_mode": "DEGRADED_PARTIAL"}}
        ]
    }))));
    let capabilities = Capabilities {
        generator: Box::new(generator.clone()),
        ..Capabilities::default()
    };
    let config = AgentConfig {
        mode: AgentMode::BootstrapLlmHeavy,
        ..AgentConfig::default()
    };
    let runner = in_memory_runner(config, capabilities);
    let job_id = runner
        .create_job(repo.path(), goal(TaskType::UpgradeRepo))
        .expect("create");

    let result = runner
        .run_step(&job_id, &Program::default(), None)
        .expect("step");

    assert_eq!(result.origins.program, Some(Origin::External));
    assert_eq!(result.events.len(), 2);
    assert_eq!(result.state.git_head.len(), 40);
    assert_eq!(
        result.state.diagnostics.memory_mode,
        MemoryMode::DegradedPartial
    );
    let prompt = &generator.requests()[0];
    assert!(prompt.contains("Repo tree:\n\nrepo/\n  - README.md"));
    assert!(!prompt.contains(".git"));

    let traces = runner
        .controller()
        .stores()
        .traces
        .recent_for_job(&job_id, 10)
        .expect("traces");
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].decision_input_summary["mode"], "bootstrap_llm_heavy");
    assert_eq!(traces[0].program_summary["instruction_count"], 2);
}

/// A failing ranking oracle never fails the step.
#[test]
fn ranking_oracle_failure_falls_back() {
    let repo = TestRepo::new().expect("repo");
    let ranker = ScriptedRanker::answering(Err(anyhow::anyhow!("ranker offline")));
    let capabilities = Capabilities {
        ranker: Box::new(ranker.clone()),
        ..Capabilities::default()
    };
    let runner = in_memory_runner(AgentConfig::default(), capabilities);
    let job_id = runner
        .create_job(repo.path(), goal(TaskType::FixFailures))
        .expect("create");

    let program = Program::new(vec![Instruction::run("true"), Instruction::run("false")]);
    let result = runner.run_step(&job_id, &program, None).expect("step");

    assert_eq!(result.origins.rerank, Origin::Fallback(FallbackReason::Failed));
    assert_eq!(result.decision.memory_view.items.len(), 2);
    assert!(!ranker.requests().is_empty());
}

/// File-backed jobs and stores survive a fresh runner over the same data
/// directory.
#[test]
fn on_disk_runner_resumes_numbering() {
    let repo = TestRepo::new().expect("repo");
    let data_dir = repo.outside().join("data");
    let runner = || {
        TaskRunner::new(
            MetaController::new(
                AgentConfig::default(),
                Stores::on_disk(&data_dir),
                Capabilities::default(),
            ),
            Box::new(FileJobs::new(data_dir.join("jobs"))),
        )
    };

    let job_id = runner()
        .create_job(repo.path(), goal(TaskType::FixFailures))
        .expect("create");
    runner()
        .run_step(&job_id, &Program::new(vec![Instruction::run("true")]), None)
        .expect("first");
    let second = runner()
        .run_step(&job_id, &Program::new(vec![Instruction::run("true")]), None)
        .expect("second");

    assert_eq!(second.events[0].step_id, 2);
    assert!(data_dir.join("events.jsonl").is_file());
    assert!(data_dir.join("memory.json").is_file());
    assert_eq!(
        second.decision.memory_view.stats.as_ref().map(|s| s.total()),
        Some(2)
    );
}

/// Stores can be assembled from individual in-memory parts.
#[test]
fn custom_store_assembly_is_accepted() {
    let repo = TestRepo::new().expect("repo");
    let stores = Stores {
        events: Arc::new(InMemoryJournal::<Event>::new()),
        traces: Arc::new(InMemoryJournal::<TraceEntry>::new()),
        memory: Arc::new(InMemoryMemoryStore::new()),
    };
    let runner = TaskRunner::new(
        MetaController::new(AgentConfig::default(), stores, Capabilities::default()),
        Box::new(InMemoryJobs::new()),
    );
    let job_id = runner
        .create_job(repo.path(), goal(TaskType::InitProject))
        .expect("create");
    let result = runner
        .run_step(&job_id, &Program::new(vec![Instruction::run("echo hi")]), None)
        .expect("step");
    assert_eq!(result.events[0].payload["stdout"], "hi\n");
}
