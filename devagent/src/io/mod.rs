//! Side-effecting building blocks: processes, git, stores and capabilities.

pub mod capability;
pub mod config;
pub mod file_store;
pub mod git;
pub mod ingest;
pub mod interpret;
pub mod jobs;
pub mod process;
pub mod prompt;
pub mod recorder;
pub mod repo_context;
pub mod schema;
pub mod stamp;
pub mod store;
