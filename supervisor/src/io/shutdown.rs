//! Operator interruption: a shared cancellation token fed by SIGINT/SIGTERM.
//!
//! The first interrupt asks for a graceful stop. A second one, while the agent
//! is still inside its grace period, asks for immediate termination.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use tracing::{debug, warn};

/// Cloneable cancellation token.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    interrupts: AtomicUsize,
    lock: Mutex<()>,
    wake: Condvar,
}

/// How an interruptible wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Elapsed,
    Interrupted,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one interrupt and wake every waiter.
    pub fn request(&self) {
        let count = self.inner.interrupts.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(count, "shutdown requested");
        let _guard = self
            .inner
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.wake.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        self.inner.interrupts.load(Ordering::SeqCst) > 0
    }

    /// True once a second interrupt has arrived.
    pub fn is_forced(&self) -> bool {
        self.inner.interrupts.load(Ordering::SeqCst) > 1
    }

    /// Block for up to `duration`, returning early on interrupt.
    ///
    /// A duration past the end of the monotonic clock waits for an interrupt.
    pub fn wait(&self, duration: Duration) -> Wake {
        let deadline = Instant::now().checked_add(duration);
        let mut guard = self
            .inner
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.is_requested() {
                return Wake::Interrupted;
            }
            guard = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Wake::Elapsed;
                    }
                    self.inner
                        .wake
                        .wait_timeout(guard, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .inner
                    .wake
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Route SIGINT and SIGTERM into this token until the guard is dropped.
    pub fn install_signal_handlers(&self) -> Result<SignalGuard> {
        let mut signals = Signals::new([SIGINT, SIGTERM]).context("register signal handlers")?;
        let handle = signals.handle();
        let shutdown = self.clone();
        let thread = thread::spawn(move || {
            for signal in signals.forever() {
                if shutdown.is_requested() {
                    warn!(signal, "second interrupt, forcing agent termination");
                } else {
                    warn!(signal, "interrupt received, stopping after the current session exits");
                }
                shutdown.request();
            }
        });
        Ok(SignalGuard {
            handle,
            thread: Some(thread),
        })
    }
}

/// Keeps OS signal routing alive; unregisters on drop.
pub struct SignalGuard {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Waits used by the supervisor loop (backoff and inter-session pauses).
pub trait Sleeper {
    fn sleep(&self, duration: Duration, shutdown: &Shutdown) -> Wake;
}

/// Real sleeper backed by the shutdown token's condition variable.
pub struct InterruptibleSleeper;

impl Sleeper for InterruptibleSleeper {
    fn sleep(&self, duration: Duration, shutdown: &Shutdown) -> Wake {
        shutdown.wait(duration)
    }
}
