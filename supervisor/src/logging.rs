//! Operator diagnostics via `tracing`.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: the per-iteration narrative, filtered by
//!   `RUST_LOG`, written to stderr.
//! - **Status lines (`supervise::IterationReport`)**: one stable line per
//!   session on stdout, unaffected by `RUST_LOG`.
//! - **Session transcripts (`io/session_log`)**: optional files holding each
//!   session's retained output.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `info` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=supervisor=debug supervisor --project-dir app --prompts-dir prompts
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
