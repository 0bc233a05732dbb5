//! Execution-and-memory core of a repository-modification agent.
//!
//! Given a goal and a program of instructions, the crate executes them
//! against a working repository, records what happened as events, turns
//! those events into memory items, and retrieves the memory relevant to the
//! next decision. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (data model, sandbox rules,
//!   selection, reranking, focus derivation, the planner rule table).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (process execution, git, stores,
//!   external capabilities, prompt rendering, configuration).
//!
//! Orchestration modules ([`retrieval`], [`planner`], [`controller`],
//! [`task`]) coordinate core logic with I/O to run one job step.

pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod planner;
pub mod retrieval;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
