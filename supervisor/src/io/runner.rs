//! Session runner abstraction for agent invocation.
//!
//! The [`SessionRunner`] trait decouples the supervisor loop from the agent
//! backend. Tests use scripted runners that return predetermined outcomes
//! without spawning processes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::rate_limit::classify_exit;
use crate::core::types::{SessionKind, SessionOutcome, SessionStatus};
use crate::io::config::SupervisorConfig;
use crate::io::process::{ProcessLimits, Termination, run_supervised};
use crate::io::session_log::{SessionLogRequest, write_session_log};
use crate::io::shutdown::Shutdown;

/// Parameters for one session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Working directory the agent is bound to.
    pub project_dir: PathBuf,
    /// 1-indexed attempt number within this supervisor process.
    pub iteration: u32,
    pub kind: SessionKind,
    /// Fully assembled instruction text, written to the agent's stdin.
    pub prompt: String,
    /// Wall-clock budget before the session is stopped as timed out.
    pub time_budget: Duration,
}

/// Abstraction over agent session backends.
///
/// Implementations must never retry on their own: every outcome, including
/// crashes and timeouts, goes back to the caller.
pub trait SessionRunner {
    fn run(&self, request: &SessionRequest, shutdown: &Shutdown) -> Result<SessionOutcome>;
}

/// Runner that spawns the configured agent command as a child process.
#[derive(Debug, Clone)]
pub struct AgentSessionRunner {
    command: Vec<String>,
    env: BTreeMap<String, String>,
    grace: Duration,
    poll_interval: Duration,
    tail_bytes: usize,
    echo: bool,
    log_dir: Option<PathBuf>,
}

impl AgentSessionRunner {
    pub fn from_config(cfg: &SupervisorConfig) -> Self {
        Self {
            command: cfg.agent.command.clone(),
            env: cfg.agent.env.clone(),
            grace: cfg.shutdown_grace(),
            poll_interval: cfg.poll_interval(),
            tail_bytes: cfg.output_tail_bytes,
            echo: cfg.echo_output,
            log_dir: cfg.session_log_dir.as_ref().map(PathBuf::from),
        }
    }

    fn build_command(&self, request: &SessionRequest) -> Command {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .current_dir(&request.project_dir)
            .envs(&self.env);
        cmd
    }
}

impl SessionRunner for AgentSessionRunner {
    #[instrument(skip_all, fields(iteration = request.iteration, kind = request.kind.as_str()))]
    fn run(&self, request: &SessionRequest, shutdown: &Shutdown) -> Result<SessionOutcome> {
        info!(
            project_dir = %request.project_dir.display(),
            budget_secs = request.time_budget.as_secs(),
            "starting agent session"
        );
        let started_at = Utc::now();
        let limits = ProcessLimits {
            timeout: request.time_budget,
            grace: self.grace,
            poll_interval: self.poll_interval,
            tail_bytes: self.tail_bytes,
            echo: self.echo,
        };
        let output = run_supervised(
            self.build_command(request),
            Some(request.prompt.clone().into_bytes()),
            &limits,
            shutdown,
        )?;

        let exit_code = output.status.code();
        let output_tail = output.combined_tail();
        let status = match output.termination {
            Termination::Interrupted => SessionStatus::Interrupted,
            Termination::TimedOut => SessionStatus::TimedOut,
            Termination::Exited => classify_exit(exit_code, &output_tail, Utc::now()),
        };
        debug!(?exit_code, %status, duration_ms = output.duration.as_millis() as u64, "agent session classified");

        if let Some(dir) = &self.log_dir {
            match write_session_log(&SessionLogRequest {
                dir,
                iteration: request.iteration,
                kind: request.kind,
                started_at,
                status,
                output: &output,
            }) {
                Ok(path) => debug!(path = %path.display(), "session transcript written"),
                Err(err) => warn!(err = %err, "failed to write session transcript"),
            }
        }

        Ok(SessionOutcome {
            status,
            exit_code,
            output_tail,
            duration: output.duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn runner(script: &str, log_dir: Option<PathBuf>) -> AgentSessionRunner {
        AgentSessionRunner {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            env: BTreeMap::from([("AGENT_MODE".to_string(), "test".to_string())]),
            grace: Duration::from_secs(2),
            poll_interval: Duration::from_millis(20),
            tail_bytes: 4096,
            echo: false,
            log_dir,
        }
    }

    fn request(project_dir: PathBuf, budget: Duration) -> SessionRequest {
        SessionRequest {
            project_dir,
            iteration: 1,
            kind: SessionKind::Continue,
            prompt: "do the next feature".to_string(),
            time_budget: budget,
        }
    }

    #[test]
    fn agent_runs_in_project_dir_with_prompt_on_stdin() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = runner("cat > received.txt; echo $AGENT_MODE > mode.txt", None);
        let outcome = agent
            .run(&request(temp.path().to_path_buf(), Duration::from_secs(10)), &Shutdown::new())
            .expect("run");
        assert_eq!(outcome.status, SessionStatus::Completed);
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(
            fs::read_to_string(temp.path().join("received.txt")).expect("read"),
            "do the next feature"
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("mode.txt")).expect("read"),
            "test\n"
        );
    }

    #[test]
    fn nonzero_exit_without_signature_is_crashed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = runner("echo 'segfault in tool'; exit 139", None);
        let outcome = agent
            .run(&request(temp.path().to_path_buf(), Duration::from_secs(10)), &Shutdown::new())
            .expect("run");
        assert_eq!(outcome.status, SessionStatus::Crashed);
        assert_eq!(outcome.exit_code, Some(139));
        assert!(outcome.output_tail.contains("segfault"));
    }

    #[test]
    fn rate_limit_message_is_classified() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log_dir = temp.path().join("logs");
        let agent = runner(
            "echo 'API Error: 429 rate_limit_error, try again in 90 seconds' >&2; exit 1",
            Some(log_dir.clone()),
        );
        let outcome = agent
            .run(&request(temp.path().to_path_buf(), Duration::from_secs(10)), &Shutdown::new())
            .expect("run");
        assert_eq!(
            outcome.status,
            SessionStatus::RateLimited {
                retry_after: Some(Duration::from_secs(90))
            }
        );
        let logs: Vec<_> = fs::read_dir(&log_dir).expect("read logs").collect();
        assert_eq!(logs.len(), 1);
    }

    #[test]
    fn exceeding_budget_times_out() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = runner("sleep 30", None);
        let outcome = agent
            .run(
                &request(temp.path().to_path_buf(), Duration::from_millis(200)),
                &Shutdown::new(),
            )
            .expect("run");
        assert_eq!(outcome.status, SessionStatus::TimedOut);
    }

    #[test]
    fn pending_interrupt_yields_interrupted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let shutdown = Shutdown::new();
        shutdown.request();
        let agent = runner("sleep 30", None);
        let outcome = agent
            .run(&request(temp.path().to_path_buf(), Duration::from_secs(30)), &shutdown)
            .expect("run");
        assert_eq!(outcome.status, SessionStatus::Interrupted);
    }
}
