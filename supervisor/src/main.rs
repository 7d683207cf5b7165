//! Long-running agent supervisor.
//!
//! Launches the configured coding agent in fresh sessions against a project
//! directory until every item in its feature checklist passes, surviving
//! crashes, timeouts, rate limits and restarts of the supervisor itself.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use supervisor::error::exit_code_for;
use supervisor::exit_codes;
use supervisor::io::checklist_store::ChecklistStore;
use supervisor::io::config::load_config;
use supervisor::io::probe::{ProbeRequest, probe_project};
use supervisor::io::prompts::PromptSet;
use supervisor::io::runner::AgentSessionRunner;
use supervisor::io::shutdown::{InterruptibleSleeper, Shutdown};
use supervisor::logging;
use supervisor::supervise::{LoopConfig, LoopOutcome, LoopStop, Supervisor};

#[derive(Parser, Debug)]
#[command(
    name = "supervisor",
    version,
    about = "Drive a coding agent in fresh sessions until its feature checklist passes"
)]
struct Cli {
    /// Project directory the agent works in. Created if missing.
    #[arg(long)]
    project_dir: PathBuf,

    /// Directory holding `initializer_prompt.md`, `coding_prompt.md` and the spec.
    #[arg(long)]
    prompts_dir: PathBuf,

    /// Stop after this many sessions in this process (unbounded if omitted).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_iterations: Option<u32>,

    /// TOML config file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    logging::init();
    match run(&cli) {
        Ok(outcome) => std::process::exit(exit_code_for_stop(outcome.stop)),
        Err(err) => {
            error!("{err:#}");
            eprintln!("supervisor: {err:#}");
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn run(cli: &Cli) -> Result<LoopOutcome> {
    let config = load_config(cli.config.as_deref())?;
    let prompts = PromptSet::load(&cli.prompts_dir, &config.spec_file)?;

    let shutdown = Shutdown::new();
    let _signals = shutdown.install_signal_handlers()?;

    let probe = probe_project(&ProbeRequest {
        project_dir: &cli.project_dir,
        prompts_dir: &cli.prompts_dir,
        max_iterations: cli.max_iterations,
        checklist_file: &config.checklist_file,
        progress_file: &config.progress_file,
    })?;
    info!(
        project_dir = %cli.project_dir.display(),
        initialized = probe.run_state.initialized,
        has_progress_notes = probe.has_progress_marker,
        max_iterations = ?cli.max_iterations,
        "supervisor starting"
    );

    let runner = AgentSessionRunner::from_config(&config);
    let mut supervisor = Supervisor {
        store: ChecklistStore::new(&cli.project_dir, &config.checklist_file),
        run_state: probe.run_state,
        prompts: &prompts,
        runner: &runner,
        sleeper: &InterruptibleSleeper,
        shutdown: &shutdown,
        config: LoopConfig::from_config(&config),
    };
    let outcome = supervisor.run(|report| println!("{}", report.status_line()))?;
    println!("{}", summary_line(&outcome));
    Ok(outcome)
}

fn exit_code_for_stop(stop: LoopStop) -> i32 {
    match stop {
        LoopStop::Complete => exit_codes::OK,
        LoopStop::MaxIterationsReached => exit_codes::MAX_ITERATIONS,
        LoopStop::Interrupted => exit_codes::INTERRUPTED,
    }
}

fn summary_line(outcome: &LoopOutcome) -> String {
    let stop = match outcome.stop {
        LoopStop::Complete => "complete",
        LoopStop::MaxIterationsReached => "max_iterations",
        LoopStop::Interrupted => "interrupted",
    };
    let mut line = format!(
        "halted reason={stop} sessions={} rate_limited={}",
        outcome.sessions, outcome.rate_limited
    );
    if let Some((passing, total)) = outcome.progress {
        line.push_str(&format!(" passing={passing}/{total}"));
    }
    line
}
