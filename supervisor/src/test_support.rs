//! Test-only helpers: checklist builders, prompt fixtures, and scripted
//! stand-ins for the agent and the clock.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

use crate::core::checklist::{Checklist, ChecklistItem};
use crate::core::types::{RunState, SessionKind, SessionOutcome, SessionStatus};
use crate::io::prompts::{CODING_PROMPT_FILE, INITIALIZER_PROMPT_FILE};
use crate::io::runner::{SessionRequest, SessionRunner};
use crate::io::shutdown::{Shutdown, Sleeper, Wake};

/// Create a checklist item in the `functional` category.
pub fn item(description: &str, passes: bool) -> ChecklistItem {
    ChecklistItem {
        category: "functional".to_string(),
        description: description.to_string(),
        steps: vec![format!("verify {description}")],
        passes,
    }
}

/// `total` items, the first `passing` of which pass.
pub fn checklist(total: usize, passing: usize) -> Checklist {
    Checklist::new(
        (0..total)
            .map(|idx| item(&format!("feature {}", idx + 1), idx < passing))
            .collect(),
    )
}

/// Write a checklist as pretty JSON, the way agents usually leave it.
pub fn write_checklist(path: &Path, checklist: &Checklist) {
    let json = serde_json::to_string_pretty(checklist).expect("serialize checklist");
    fs::write(path, json).expect("write checklist");
}

pub fn run_state(iteration: u32, max_iterations: Option<u32>) -> RunState {
    RunState {
        project_dir: PathBuf::from("project"),
        prompts_dir: PathBuf::from("prompts"),
        iteration,
        max_iterations,
        initialized: false,
    }
}

/// Populate a prompts directory with both instruction files and a spec.
pub fn write_prompts(dir: &Path) {
    fs::create_dir_all(dir).expect("create prompts dir");
    fs::write(dir.join(INITIALIZER_PROMPT_FILE), "initializer instructions\n")
        .expect("write initializer prompt");
    fs::write(dir.join(CODING_PROMPT_FILE), "coding instructions\n").expect("write coding prompt");
    fs::write(dir.join("app_spec.txt"), "build a todo app\n").expect("write spec");
}

/// One scripted session: its outcome plus the side effects it leaves behind.
#[derive(Debug, Clone)]
pub struct ScriptedSession {
    pub status: SessionStatus,
    pub exit_code: Option<i32>,
    /// Written to `feature_list.json` in the project before returning.
    pub checklist: Option<Checklist>,
    /// Raise an interrupt on the shared token while "running".
    pub interrupt: bool,
}

impl ScriptedSession {
    pub fn new(status: SessionStatus) -> Self {
        let exit_code = match status {
            SessionStatus::Completed => Some(0),
            SessionStatus::Crashed | SessionStatus::RateLimited { .. } => Some(1),
            SessionStatus::TimedOut | SessionStatus::Interrupted => None,
        };
        Self {
            status,
            exit_code,
            checklist: None,
            interrupt: false,
        }
    }

    pub fn completed() -> Self {
        Self::new(SessionStatus::Completed)
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::new(SessionStatus::RateLimited { retry_after })
    }

    pub fn interrupting() -> Self {
        Self {
            interrupt: true,
            ..Self::new(SessionStatus::Interrupted)
        }
    }

    pub fn with_checklist(mut self, checklist: Checklist) -> Self {
        self.checklist = Some(checklist);
        self
    }
}

/// A session runner that replays a fixed script instead of spawning an agent.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    script: RefCell<VecDeque<ScriptedSession>>,
    calls: RefCell<Vec<(SessionRequest, Instant)>>,
}

impl ScriptedRunner {
    pub fn new(script: Vec<ScriptedSession>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn kinds(&self) -> Vec<SessionKind> {
        self.calls.borrow().iter().map(|(req, _)| req.kind).collect()
    }

    pub fn iterations(&self) -> Vec<u32> {
        self.calls.borrow().iter().map(|(req, _)| req.iteration).collect()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|(req, _)| req.prompt.clone())
            .collect()
    }

    /// Wall-clock instant of each invocation.
    pub fn started_at(&self) -> Vec<Instant> {
        self.calls.borrow().iter().map(|(_, at)| *at).collect()
    }

    /// Fail if scripted sessions were left unused.
    pub fn assert_drained(&self) -> Result<()> {
        let remaining = self.script.borrow().len();
        if remaining == 0 {
            Ok(())
        } else {
            Err(anyhow!("{remaining} scripted sessions were never run"))
        }
    }
}

impl SessionRunner for ScriptedRunner {
    fn run(&self, request: &SessionRequest, shutdown: &Shutdown) -> Result<SessionOutcome> {
        self.calls
            .borrow_mut()
            .push((request.clone(), Instant::now()));
        let session = self
            .script
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("unexpected session {}", request.iteration))?;
        if let Some(list) = &session.checklist {
            write_checklist(&request.project_dir.join("feature_list.json"), list);
        }
        if session.interrupt {
            shutdown.request();
        }
        Ok(SessionOutcome {
            exit_code: session.exit_code,
            ..SessionOutcome::new(session.status)
        })
    }
}

/// Sleeper that records requested durations and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    durations: RefCell<Vec<Duration>>,
    interrupt: bool,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise an interrupt on the first sleep, as if Ctrl-C landed mid-wait.
    pub fn interrupting() -> Self {
        Self {
            interrupt: true,
            ..Self::default()
        }
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.durations.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, shutdown: &Shutdown) -> Wake {
        self.durations.borrow_mut().push(duration);
        if self.interrupt {
            shutdown.request();
            return Wake::Interrupted;
        }
        Wake::Elapsed
    }
}
