//! Stable exit codes for the supervisor binary.

/// Checklist fully passing.
pub const OK: i32 = 0;
/// Fatal runtime failure, including a malformed checklist.
pub const FATAL: i32 = 1;
/// Command-line usage error (reported by clap before anything runs).
pub const USAGE: i32 = 2;
/// Invalid configuration or prompts directory, detected before any session.
pub const CONFIGURATION: i32 = 3;
/// The iteration bound was reached without a complete checklist.
pub const MAX_ITERATIONS: i32 = 4;
/// Halted by an operator interrupt; rerun the same command to resume.
pub const INTERRUPTED: i32 = 130;
