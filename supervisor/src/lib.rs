//! Crash-tolerant supervisor for long-running coding agents.
//!
//! The supervisor drives an external, session-based agent in a loop until the
//! project's feature checklist is fully passing. It keeps no state of its own:
//! every decision is re-derived from the project directory, so it can be
//! killed and restarted at any point.
//!
//! - **[`core`]**: Pure, deterministic logic (resume policy, checklist rules,
//!   rate-limit detection). No I/O.
//! - **[`io`]**: Side effects (filesystem, child processes, signals, config).
//!
//! [`supervise`] ties the two together into the session loop.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod supervise;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
