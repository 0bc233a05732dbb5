//! Deterministic, pure logic shared by the agent core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod focus;
pub mod memory;
pub mod plan;
pub mod planner;
pub mod reranker;
pub mod sandbox;
pub mod selector;
pub mod types;
pub mod views;
