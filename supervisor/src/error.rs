//! Fatal error taxonomy.
//!
//! Only these conditions stop the supervisor with a fatal report. Crashes,
//! timeouts and rate limits are session statuses, not errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::exit_codes;

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Bad arguments, config or prompt files. Raised before any session runs.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Checklist present but unparseable, or it broke the append/flip-only
    /// contract. Needs an operator; the supervisor never repairs it.
    #[error("malformed checklist {}: {reason}", path.display())]
    MalformedChecklist { path: PathBuf, reason: String },
}

impl SupervisorError {
    pub fn exit_code(&self) -> i32 {
        match self {
            SupervisorError::Configuration(_) => exit_codes::CONFIGURATION,
            SupervisorError::MalformedChecklist { .. } => exit_codes::FATAL,
        }
    }
}

/// Pick the process exit code for an error surfaced from `main`.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SupervisorError>())
        .map_or(exit_codes::FATAL, SupervisorError::exit_code)
}
