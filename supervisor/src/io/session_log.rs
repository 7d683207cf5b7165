//! Per-session transcript files.
//!
//! Transcripts are diagnostics only: they hold the retained output tail, the
//! exit code and the classification. They are written after the agent has
//! exited, into a directory chosen by the operator.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::core::types::{SessionKind, SessionStatus};
use crate::io::process::ChildOutput;

pub struct SessionLogRequest<'a> {
    pub dir: &'a Path,
    pub iteration: u32,
    pub kind: SessionKind,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub output: &'a ChildOutput,
}

/// Stable transcript path for one session.
pub fn session_log_path(dir: &Path, started_at: DateTime<Utc>, iteration: u32) -> PathBuf {
    dir.join(format!(
        "session-{}-{iteration:04}.log",
        started_at.format("%Y%m%dT%H%M%SZ")
    ))
}

pub fn write_session_log(request: &SessionLogRequest<'_>) -> Result<PathBuf> {
    fs::create_dir_all(request.dir)
        .with_context(|| format!("create session log dir {}", request.dir.display()))?;
    let path = session_log_path(request.dir, request.started_at, request.iteration);
    let output = request.output;

    let mut buf = String::new();
    buf.push_str(&format!("iteration: {}\n", request.iteration));
    buf.push_str(&format!("kind: {}\n", request.kind.as_str()));
    buf.push_str(&format!("started_at: {}\n", request.started_at.to_rfc3339()));
    buf.push_str(&format!("duration_ms: {}\n", output.duration.as_millis()));
    buf.push_str(&format!("exit_code: {:?}\n", output.status.code()));
    buf.push_str(&format!("status: {}\n", request.status));
    if let SessionStatus::RateLimited {
        retry_after: Some(retry_after),
    } = request.status
    {
        buf.push_str(&format!("retry_after_secs: {}\n", retry_after.as_secs()));
    }
    buf.push_str("\n=== stdout ===\n");
    buf.push_str(&output.stdout_dropped_notice("agent"));
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&output.stderr_dropped_notice("agent"));
    buf.push_str(&String::from_utf8_lossy(&output.stderr));

    fs::write(&path, buf).with_context(|| format!("write session log {}", path.display()))?;
    Ok(path)
}
