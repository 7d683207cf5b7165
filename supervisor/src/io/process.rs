//! Supervised child processes: bounded output tails, live tee, timeouts and
//! cancellation with graceful-then-forced termination.
//!
//! The child runs in its own process group so terminal interrupts reach only
//! the supervisor, which then decides what the agent (and anything the agent
//! started) receives and when.

use std::io::{ErrorKind, Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::error::SupervisorError;
use crate::io::shutdown::Shutdown;

/// How long to keep draining pipes after the child exits. Background
/// grandchildren can hold the pipes open indefinitely.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Stand-in horizon for budgets too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Limits for one supervised child.
#[derive(Debug, Clone)]
pub struct ProcessLimits {
    /// Wall-clock budget before the child is terminated.
    pub timeout: Duration,
    /// Time between the polite signal and SIGKILL.
    pub grace: Duration,
    /// Wait slice between cancellation checks.
    pub poll_interval: Duration,
    /// Bytes retained from the end of each stream.
    pub tail_bytes: usize,
    /// Copy child output to our own stdout/stderr as it arrives.
    pub echo: bool,
}

/// Why the child stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited on its own.
    Exited,
    /// Stopped by the supervisor after the time budget ran out.
    TimedOut,
    /// Stopped by the supervisor after an operator interrupt.
    Interrupted,
}

/// Captured child process result.
#[derive(Debug)]
pub struct ChildOutput {
    pub status: ExitStatus,
    pub termination: Termination,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Leading bytes discarded to keep only the tail.
    pub stdout_dropped: usize,
    pub stderr_dropped: usize,
    pub duration: Duration,
}

impl ChildOutput {
    /// Retained stdout followed by retained stderr, lossily decoded.
    pub fn combined_tail(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        text
    }

    pub fn stdout_dropped_notice(&self, label: &str) -> String {
        dropped_notice(label, "stdout", self.stdout_dropped)
    }

    pub fn stderr_dropped_notice(&self, label: &str) -> String {
        dropped_notice(label, "stderr", self.stderr_dropped)
    }
}

fn dropped_notice(label: &str, stream: &str, dropped: usize) -> String {
    if dropped > 0 {
        format!("[{label} {stream}: first {dropped} bytes not retained]\n")
    } else {
        String::new()
    }
}

/// Run `cmd` to completion, timeout or interruption.
///
/// `stdin` is written from a helper thread and then closed, so a child that
/// never reads its input cannot deadlock the supervisor. Output is drained
/// concurrently; only the last `tail_bytes` of each stream are kept.
///
/// On interrupt the process group receives SIGINT; on timeout SIGTERM. Either
/// way SIGKILL follows after `grace`, or immediately on a second interrupt.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs(), tail_bytes = limits.tail_bytes))]
pub fn run_supervised(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    limits: &ProcessLimits,
    shutdown: &Shutdown,
) -> Result<ChildOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let start = Instant::now();
    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            error!(err = %e, program = ?cmd.get_program(), "agent executable not found");
            return Err(SupervisorError::Configuration(format!(
                "agent executable {:?} not found",
                cmd.get_program()
            ))
            .into());
        }
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            Some(thread::spawn(move || -> Result<()> {
                match child_stdin.write_all(&input) {
                    Err(e) if e.kind() != ErrorKind::BrokenPipe => {
                        Err(e).context("write child stdin")
                    }
                    _ => Ok(()),
                }
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_tail = SharedTail::default();
    let stderr_tail = SharedTail::default();
    let stdout_echo: Option<Box<dyn Write + Send>> =
        limits.echo.then(|| Box::new(std::io::stdout()) as Box<dyn Write + Send>);
    let stderr_echo: Option<Box<dyn Write + Send>> =
        limits.echo.then(|| Box::new(std::io::stderr()) as Box<dyn Write + Send>);
    let stdout_handle = spawn_pump(stdout, stdout_tail.clone(), limits.tail_bytes, stdout_echo);
    let stderr_handle = spawn_pump(stderr, stderr_tail.clone(), limits.tail_bytes, stderr_echo);

    let deadline = deadline_after(start, limits.timeout);
    let (termination, status) = loop {
        let slice = limits
            .poll_interval
            .min(deadline.saturating_duration_since(Instant::now()));
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            break (Termination::Exited, status);
        }
        if shutdown.is_requested() {
            warn!(
                grace_secs = limits.grace.as_secs(),
                "forwarding interrupt to agent"
            );
            let status = terminate(&mut child, Signal::SIGINT, limits, shutdown)?;
            break (Termination::Interrupted, status);
        }
        if Instant::now() >= deadline {
            warn!(
                timeout_secs = limits.timeout.as_secs(),
                "command timed out, terminating"
            );
            let status = terminate(&mut child, Signal::SIGTERM, limits, shutdown)?;
            break (Termination::TimedOut, status);
        }
    };

    if let Some(handle) = stdin_handle {
        finish_pump(handle, "stdin");
    }
    finish_pump(stdout_handle, "stdout");
    finish_pump(stderr_handle, "stderr");

    let (stdout, stdout_dropped) = stdout_tail.snapshot();
    let (stderr, stderr_dropped) = stderr_tail.snapshot();
    if stdout_dropped > 0 || stderr_dropped > 0 {
        debug!(stdout_dropped, stderr_dropped, "output tail trimmed");
    }

    debug!(exit_code = ?status.code(), ?termination, "command finished");
    Ok(ChildOutput {
        status,
        termination,
        stdout,
        stderr,
        stdout_dropped,
        stderr_dropped,
        duration: start.elapsed(),
    })
}

/// Signal the child's process group, wait out the grace period, then kill.
fn terminate(
    child: &mut Child,
    signal: Signal,
    limits: &ProcessLimits,
    shutdown: &Shutdown,
) -> Result<ExitStatus> {
    signal_group(child, signal);
    let deadline = deadline_after(Instant::now(), limits.grace);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() || shutdown.is_forced() {
            break;
        }
        if let Some(status) = child
            .wait_timeout(limits.poll_interval.min(remaining))
            .context("wait for command after signal")?
        {
            debug!(exit_code = ?status.code(), "child exited within grace period");
            return Ok(status);
        }
    }

    warn!("grace period over, killing agent process group");
    signal_group(child, Signal::SIGKILL);
    if let Err(e) = child.kill()
        && e.kind() != ErrorKind::InvalidInput
    {
        warn!(err = %e, "failed to kill child");
    }
    child.wait().context("wait command after kill")
}

fn signal_group(child: &Child, signal: Signal) {
    let Ok(pid) = i32::try_from(child.id()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), signal) {
        Ok(()) => debug!(pid, ?signal, "signal sent to process group"),
        Err(nix::errno::Errno::ESRCH) => debug!(pid, ?signal, "process group already gone"),
        Err(e) => warn!(pid, ?signal, err = %e, "failed to signal process group"),
    }
}

/// Tail of a stream shared between its reader thread and the supervisor.
#[derive(Debug, Clone, Default)]
struct SharedTail(Arc<Mutex<Tail>>);

#[derive(Debug, Default)]
struct Tail {
    bytes: Vec<u8>,
    dropped: usize,
}

impl SharedTail {
    fn push(&self, chunk: &[u8], limit: usize) {
        let mut tail = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        tail.bytes.extend_from_slice(chunk);
        if tail.bytes.len() > limit {
            let excess = tail.bytes.len() - limit;
            tail.bytes.drain(..excess);
            tail.dropped += excess;
        }
    }

    fn snapshot(&self) -> (Vec<u8>, usize) {
        let tail = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        (tail.bytes.clone(), tail.dropped)
    }
}

fn spawn_pump<R: Read + Send + 'static>(
    reader: R,
    tail: SharedTail,
    limit: usize,
    echo: Option<Box<dyn Write + Send>>,
) -> JoinHandle<Result<()>> {
    thread::spawn(move || pump(reader, &tail, limit, echo))
}

fn pump<R: Read>(
    mut reader: R,
    tail: &SharedTail,
    limit: usize,
    mut echo: Option<Box<dyn Write + Send>>,
) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("read output"),
        };
        if let Some(writer) = echo.as_mut()
            && let Err(e) = writer.write_all(&chunk[..n]).and_then(|()| writer.flush())
        {
            warn!(err = %e, "failed to echo child output, echo disabled");
            echo = None;
        }
        tail.push(&chunk[..n], limit);
    }
    Ok(())
}

/// `start + budget`, or a year out when that is not representable.
fn deadline_after(start: Instant, budget: Duration) -> Instant {
    start
        .checked_add(budget)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Wait briefly for a pipe thread to finish; leave it detached if the pipe is
/// still held open by a descendant.
fn finish_pump(handle: JoinHandle<Result<()>>, stream: &str) {
    let deadline = Instant::now() + PIPE_DRAIN_TIMEOUT;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(stream, "pipe still open after child exit, not waiting further");
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    match handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(stream, err = %e, "pipe thread failed"),
        Err(_) => warn!(stream, "pipe thread panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(timeout: Duration) -> ProcessLimits {
        ProcessLimits {
            timeout,
            grace: Duration::from_secs(2),
            poll_interval: Duration::from_millis(20),
            tail_bytes: 1024,
            echo: false,
        }
    }

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_exit_code_and_output() {
        let output = run_supervised(
            sh("echo out; echo err >&2; exit 3"),
            None,
            &limits(Duration::from_secs(10)),
            &Shutdown::new(),
        )
        .expect("run");
        assert_eq!(output.termination, Termination::Exited);
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.combined_tail(), "out\nerr\n");
    }

    #[test]
    fn feeds_stdin_to_child() {
        let output = run_supervised(
            sh("cat"),
            Some(b"prompt payload".to_vec()),
            &limits(Duration::from_secs(10)),
            &Shutdown::new(),
        )
        .expect("run");
        assert_eq!(output.stdout, b"prompt payload");
    }

    #[test]
    fn keeps_only_the_tail() {
        let mut lim = limits(Duration::from_secs(10));
        lim.tail_bytes = 4;
        let output =
            run_supervised(sh("printf 'abcdefgh'"), None, &lim, &Shutdown::new()).expect("run");
        assert_eq!(output.stdout, b"efgh");
        assert_eq!(output.stdout_dropped, 4);
        assert!(output.stdout_dropped_notice("agent").contains("first 4 bytes"));
    }

    #[test]
    fn times_out_and_terminates() {
        let start = Instant::now();
        let output = run_supervised(
            sh("sleep 30"),
            None,
            &limits(Duration::from_millis(200)),
            &Shutdown::new(),
        )
        .expect("run");
        assert_eq!(output.termination, Termination::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn stdin_held_by_descendant_does_not_block_return() {
        // A background process keeps the stdin pipe open without reading it,
        // so writing a payload larger than the pipe buffer never completes.
        let start = Instant::now();
        let output = run_supervised(
            sh("exec 3<&0; sleep 10 >/dev/null 2>&1 & exit 0"),
            Some(vec![b'x'; 1024 * 1024]),
            &limits(Duration::from_secs(30)),
            &Shutdown::new(),
        )
        .expect("run");
        assert_eq!(output.termination, Termination::Exited);
        assert_eq!(output.status.code(), Some(0));
        assert!(start.elapsed() < Duration::from_secs(8));
    }

    #[test]
    fn huge_budget_does_not_overflow_deadline() {
        let mut lim = limits(Duration::MAX);
        lim.grace = Duration::MAX;
        let output = run_supervised(sh("exit 0"), None, &lim, &Shutdown::new()).expect("run");
        assert_eq!(output.termination, Termination::Exited);
    }

    #[test]
    fn interrupt_is_forwarded_and_child_exits_gracefully() {
        let shutdown = Shutdown::new();
        let remote = shutdown.clone();
        let trigger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            remote.request();
        });
        let output = run_supervised(
            sh("trap 'echo stopping; exit 0' INT; while true; do sleep 0.05; done"),
            None,
            &limits(Duration::from_secs(30)),
            &shutdown,
        )
        .expect("run");
        trigger.join().expect("join");
        assert_eq!(output.termination, Termination::Interrupted);
        assert!(output.combined_tail().contains("stopping"));
    }

    #[test]
    fn stubborn_child_is_killed_after_grace() {
        let shutdown = Shutdown::new();
        shutdown.request();
        let mut lim = limits(Duration::from_secs(30));
        lim.grace = Duration::from_millis(300);
        let start = Instant::now();
        let output = run_supervised(
            sh("trap '' INT; sleep 30"),
            None,
            &lim,
            &shutdown,
        )
        .expect("run");
        assert_eq!(output.termination, Termination::Interrupted);
        assert!(output.status.code().is_none());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn missing_executable_is_a_configuration_error() {
        let err = run_supervised(
            Command::new("definitely-not-an-agent-binary"),
            None,
            &limits(Duration::from_secs(1)),
            &Shutdown::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SupervisorError>(),
            Some(SupervisorError::Configuration(_))
        ));
    }
}
