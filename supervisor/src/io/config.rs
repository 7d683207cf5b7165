//! Supervisor configuration, optionally loaded from a TOML file.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::core::rate_limit::DEFAULT_RATE_LIMIT_FALLBACK;
use crate::error::SupervisorError;

/// Per-session wall-clock budget. Generous: a session may build and
/// browser-test several features before exiting.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60 * 60);
/// Time an interrupted agent gets to exit on its own before it is killed.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Supervisor configuration (TOML).
///
/// Every field is optional in the file; missing fields take the defaults
/// below. Tuning constants live here rather than in the loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Per-session time budget in seconds.
    pub session_timeout_secs: u64,

    /// Grace period between forwarding an interrupt and killing the agent.
    pub shutdown_grace_secs: u64,

    /// Backoff when a rate limit carries no reset time.
    pub rate_limit_fallback_secs: u64,

    /// Extra wait on top of a reset-time derived backoff.
    pub rate_limit_reset_buffer_secs: u64,

    /// Pause between sessions after a completed, crashed or timed-out session.
    pub continue_delay_secs: u64,

    /// Bytes of stdout/stderr tail retained per stream for classification.
    pub output_tail_bytes: usize,

    /// Child wait slice; bounds how quickly an interrupt is noticed.
    pub poll_interval_ms: u64,

    /// Checklist file name inside the project directory.
    pub checklist_file: String,

    /// Progress notes the agent keeps inside the project directory.
    pub progress_file: String,

    /// Project specification file name (prompts directory and project copy).
    pub spec_file: String,

    /// Tee agent output to the supervisor's stdout/stderr while it runs.
    pub echo_output: bool,

    /// Where per-session transcripts are written. Disabled when unset.
    pub session_log_dir: Option<String>,

    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent command line. The prompt payload is written to its stdin.
    pub command: Vec<String>,
    /// Extra environment for the agent process.
    pub env: BTreeMap<String, String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "claude".to_string(),
                "-p".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            env: BTreeMap::new(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT.as_secs(),
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE.as_secs(),
            rate_limit_fallback_secs: DEFAULT_RATE_LIMIT_FALLBACK.as_secs(),
            rate_limit_reset_buffer_secs: 60,
            continue_delay_secs: 3,
            output_tail_bytes: 64 * 1024,
            poll_interval_ms: 200,
            checklist_file: "feature_list.json".to_string(),
            progress_file: "claude-progress.txt".to_string(),
            spec_file: "app_spec.txt".to_string(),
            echo_output: true,
            session_log_dir: None,
            agent: AgentConfig::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.session_timeout_secs == 0 {
            return Err(invalid("session_timeout_secs must be > 0"));
        }
        if self.output_tail_bytes == 0 {
            return Err(invalid("output_tail_bytes must be > 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be > 0"));
        }
        if self.checklist_file.trim().is_empty() {
            return Err(invalid("checklist_file must be non-empty"));
        }
        if self.spec_file.trim().is_empty() {
            return Err(invalid("spec_file must be non-empty"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(invalid("agent.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn rate_limit_fallback(&self) -> Duration {
        Duration::from_secs(self.rate_limit_fallback_secs)
    }

    pub fn rate_limit_reset_buffer(&self) -> Duration {
        Duration::from_secs(self.rate_limit_reset_buffer_secs)
    }

    pub fn continue_delay(&self) -> Duration {
        Duration::from_secs(self.continue_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn invalid(message: &str) -> SupervisorError {
    SupervisorError::Configuration(message.to_string())
}

/// Load config from a TOML file, or defaults when no path is given.
///
/// An explicitly named file that is missing or unparseable is a
/// configuration error.
pub fn load_config(path: Option<&Path>) -> Result<SupervisorConfig, SupervisorError> {
    let Some(path) = path else {
        let cfg = SupervisorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    };
    let contents = fs::read_to_string(path).map_err(|err| {
        SupervisorError::Configuration(format!("read {}: {err}", path.display()))
    })?;
    let cfg: SupervisorConfig = toml::from_str(&contents).map_err(|err| {
        SupervisorError::Configuration(format!("parse {}: {err}", path.display()))
    })?;
    cfg.validate()?;
    Ok(cfg)
}
