//! The supervisor loop: decide, run one session, evaluate, repeat.
//!
//! ```text
//! Deciding --Run(kind)--> Running --> Evaluating --+--> Deciding
//!    |                                             +--> Backoff --> Deciding
//!    +--Halt--> Halted                             +--> Halted (interrupted)
//! ```
//!
//! The checklist is re-read in every `Deciding` phase and is the only
//! authority on completion. Sessions never overlap, and the supervisor does
//! not touch the project directory while a session runs.

use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::core::checklist::Checklist;
use crate::core::resume::next_action;
use crate::core::types::{HaltReason, NextAction, RunState, SessionKind, SessionStatus};
use crate::io::checklist_store::{ChecklistStore, read_checklist};
use crate::io::config::SupervisorConfig;
use crate::io::prompts::PromptSet;
use crate::io::runner::{SessionRequest, SessionRunner};
use crate::io::shutdown::{Shutdown, Sleeper, Wake};

/// Timing knobs the loop needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    pub session_timeout: Duration,
    pub rate_limit_fallback: Duration,
    pub rate_limit_reset_buffer: Duration,
    pub continue_delay: Duration,
}

impl LoopConfig {
    pub fn from_config(cfg: &SupervisorConfig) -> Self {
        Self {
            session_timeout: cfg.session_timeout(),
            rate_limit_fallback: cfg.rate_limit_fallback(),
            rate_limit_reset_buffer: cfg.rate_limit_reset_buffer(),
            continue_delay: cfg.continue_delay(),
        }
    }

    /// Backoff for a rate-limited session.
    pub fn backoff(&self, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(delay) => delay.saturating_add(self.rate_limit_reset_buffer),
            None => self.rate_limit_fallback,
        }
    }
}

/// Reason why `Supervisor::run` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// Every checklist item passes.
    Complete,
    /// The iteration bound was used up first.
    MaxIterationsReached,
    /// An operator interrupt was observed.
    Interrupted,
}

/// One line of operator-facing progress, emitted after every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub iteration: u32,
    pub kind: SessionKind,
    pub status: SessionStatus,
    pub exit_code: Option<i32>,
    /// Backoff about to be taken, for rate-limited sessions.
    pub backoff: Option<Duration>,
}

impl IterationReport {
    /// Stable, greppable status line.
    pub fn status_line(&self) -> String {
        let mut line = format!(
            "iter={} action={} outcome={}",
            self.iteration,
            self.kind.as_str(),
            self.status
        );
        if let Some(code) = self.exit_code {
            line.push_str(&format!(" exit_code={code}"));
        }
        if let Some(backoff) = self.backoff {
            line.push_str(&format!(" backoff={}", format_duration(backoff)));
        }
        line
    }
}

/// Summary of a supervisor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Sessions launched by this process.
    pub sessions: u32,
    /// How many of them were rate limited.
    pub rate_limited: u32,
    pub stop: LoopStop,
    /// `(passing, total)` from the last checklist load, if any.
    pub progress: Option<(usize, usize)>,
}

/// Drives sessions for one project until completion, the iteration bound, or
/// an interrupt.
pub struct Supervisor<'a, R: SessionRunner, S: Sleeper> {
    pub run_state: RunState,
    pub store: ChecklistStore,
    pub prompts: &'a PromptSet,
    pub runner: &'a R,
    pub sleeper: &'a S,
    pub shutdown: &'a Shutdown,
    pub config: LoopConfig,
}

impl<R: SessionRunner, S: Sleeper> Supervisor<'_, R, S> {
    /// Run until a halt condition.
    ///
    /// Returns `Err` only for fatal conditions: a malformed checklist, a
    /// configuration problem discovered while launching, or an I/O failure of
    /// the supervisor itself. Crashes, timeouts and rate limits are absorbed.
    pub fn run<F: FnMut(&IterationReport)>(&mut self, mut on_iteration: F) -> Result<LoopOutcome> {
        let mut sessions = 0u32;
        let mut rate_limited = 0u32;
        let mut pending_pause: Option<Duration> = None;

        loop {
            // Deciding
            if self.shutdown.is_requested() {
                return Ok(self.interrupted(sessions, rate_limited));
            }
            let checklist = self.store.load()?;
            if let Some(list) = &checklist {
                self.run_state.initialized = true;
                log_progress(list);
            }
            let kind = match next_action(&self.run_state, checklist.as_ref()) {
                NextAction::Halt(HaltReason::AlreadyComplete) => {
                    info!(sessions, "checklist complete");
                    return Ok(self.outcome(
                        sessions,
                        rate_limited,
                        LoopStop::Complete,
                        checklist.as_ref(),
                    ));
                }
                NextAction::Halt(HaltReason::MaxIterationsReached) => {
                    info!(
                        sessions,
                        max_iterations = ?self.run_state.max_iterations,
                        "reached max iterations"
                    );
                    return Ok(self.outcome(
                        sessions,
                        rate_limited,
                        LoopStop::MaxIterationsReached,
                        checklist.as_ref(),
                    ));
                }
                NextAction::Run(kind) => kind,
            };

            if let Some(pause) = pending_pause.take()
                && !pause.is_zero()
                && self.sleeper.sleep(pause, self.shutdown) == Wake::Interrupted
            {
                return Ok(self.interrupted(sessions, rate_limited));
            }

            // Running
            if kind == SessionKind::Initialize {
                self.prompts.copy_spec_to_project(&self.run_state.project_dir)?;
            }
            self.run_state.iteration += 1;
            sessions += 1;
            let request = SessionRequest {
                project_dir: self.run_state.project_dir.clone(),
                iteration: self.run_state.iteration,
                kind,
                prompt: self.prompts.payload(kind),
                time_budget: self.config.session_timeout,
            };
            info!(iteration = request.iteration, kind = kind.as_str(), "session starting");
            let outcome = self.runner.run(&request, self.shutdown)?;

            // Evaluating
            let mut report = IterationReport {
                iteration: request.iteration,
                kind,
                status: outcome.status,
                exit_code: outcome.exit_code,
                backoff: None,
            };
            match outcome.status {
                SessionStatus::Completed => {
                    info!(iteration = report.iteration, "session completed");
                    on_iteration(&report);
                    pending_pause = Some(self.config.continue_delay);
                }
                SessionStatus::Crashed | SessionStatus::TimedOut => {
                    warn!(
                        iteration = report.iteration,
                        status = %outcome.status,
                        exit_code = ?outcome.exit_code,
                        tail = %last_lines(&outcome.output_tail, 5),
                        "session failed, retrying with a fresh session"
                    );
                    on_iteration(&report);
                    pending_pause = Some(self.config.continue_delay);
                }
                SessionStatus::RateLimited { retry_after } => {
                    rate_limited += 1;
                    let backoff = self.config.backoff(retry_after);
                    report.backoff = Some(backoff);
                    warn!(
                        iteration = report.iteration,
                        backoff_secs = backoff.as_secs(),
                        from_reset_time = retry_after.is_some(),
                        "rate limited, backing off"
                    );
                    on_iteration(&report);
                    // Backoff
                    if self.sleeper.sleep(backoff, self.shutdown) == Wake::Interrupted {
                        return Ok(self.interrupted(sessions, rate_limited));
                    }
                }
                SessionStatus::Interrupted => {
                    info!(iteration = report.iteration, "session interrupted, halting");
                    on_iteration(&report);
                    return Ok(self.interrupted(sessions, rate_limited));
                }
            }
        }
    }

    /// Outcome for an interrupt, with progress as the agent left it.
    fn interrupted(&self, sessions: u32, rate_limited: u32) -> LoopOutcome {
        let latest = match read_checklist(self.store.path()) {
            Ok(list) => list,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not re-read checklist after interrupt");
                None
            }
        };
        self.outcome(sessions, rate_limited, LoopStop::Interrupted, latest.as_ref())
    }

    fn outcome(
        &self,
        sessions: u32,
        rate_limited: u32,
        stop: LoopStop,
        checklist: Option<&Checklist>,
    ) -> LoopOutcome {
        LoopOutcome {
            sessions,
            rate_limited,
            stop,
            progress: checklist.map(|list| (list.passing(), list.len())),
        }
    }
}

fn log_progress(list: &Checklist) {
    if list.is_empty() {
        warn!("checklist has no items; initialization probably failed, continuing");
        return;
    }
    let passing = list.passing();
    let total = list.len();
    info!(
        passing,
        total,
        percent = %format!("{:.1}", passing as f64 * 100.0 / total as f64),
        "checklist progress"
    );
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().rev().take(count).collect();
    lines.into_iter().rev().collect::<Vec<_>>().join(" | ")
}

/// `1h 5m`, `4m 10s`, `45s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, rem) = (secs / 3600, secs % 3600);
    let (minutes, seconds) = (rem / 60, rem % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
