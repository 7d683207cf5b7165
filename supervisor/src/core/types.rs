//! Shared deterministic types for supervisor core logic.
//!
//! These types define stable contracts between the detector, the resume policy
//! and the supervisor loop. They carry no I/O handles and compare by value.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Which standing instruction set a session receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// One-time session that creates the checklist and the project scaffold.
    Initialize,
    /// Every later session; advances checklist completion.
    Continue,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::Initialize => "initialize",
            SessionKind::Continue => "continue",
        }
    }
}

/// Why the supervisor stops without launching another session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// Every checklist item passes.
    AlreadyComplete,
    /// The configured iteration bound has been used up.
    MaxIterationsReached,
}

/// Decision produced by the resume policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    Run(SessionKind),
    Halt(HaltReason),
}

/// Terminal classification of one agent session.
///
/// The retry-after duration only exists on the rate-limited variant. `None`
/// there means the signature carried no usable reset time and the caller must
/// apply its fallback backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Completed,
    RateLimited { retry_after: Option<Duration> },
    Crashed,
    TimedOut,
    Interrupted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Completed => "completed",
            SessionStatus::RateLimited { .. } => "rate_limited",
            SessionStatus::Crashed => "crashed",
            SessionStatus::TimedOut => "timed_out",
            SessionStatus::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one session runner invocation. Consumed immediately by the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub status: SessionStatus,
    /// `None` when the child was killed by a signal.
    pub exit_code: Option<i32>,
    /// Bounded tail of combined stdout/stderr, kept for diagnostics.
    pub output_tail: String,
    pub duration: Duration,
}

impl SessionOutcome {
    pub fn new(status: SessionStatus) -> Self {
        Self {
            status,
            exit_code: None,
            output_tail: String::new(),
            duration: Duration::ZERO,
        }
    }
}

/// Process-wide state for one supervised run.
///
/// Rebuilt from the filesystem on every startup; nothing here outlives the
/// process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub project_dir: PathBuf,
    pub prompts_dir: PathBuf,
    /// Sessions launched by this process so far.
    pub iteration: u32,
    /// `None` means unbounded.
    pub max_iterations: Option<u32>,
    /// Whether the initialization session has already produced a checklist.
    pub initialized: bool,
}
