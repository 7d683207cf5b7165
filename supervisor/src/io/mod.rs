//! I/O adapters for the supervisor.

pub mod checklist_store;
pub mod config;
pub mod probe;
pub mod process;
pub mod prompts;
pub mod runner;
pub mod session_log;
pub mod shutdown;
