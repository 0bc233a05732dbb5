//! Stable exit codes for devagent CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input, config or program, or any other error.
pub const INVALID: i32 = 1;
/// `devagent job step` named a job that does not exist.
pub const NOT_FOUND: i32 = 2;
