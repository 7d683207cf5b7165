//! Read-only access to the agent-owned checklist file.
//!
//! The supervisor never writes this file. Only agent sessions, which can
//! actually exercise the project, may flip `passes`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::checklist::{Checklist, check_checklist_transition};
use crate::error::SupervisorError;

/// Read the checklist at `path`.
///
/// Returns `Ok(None)` when the file does not exist (initialization has not
/// run yet) and `SupervisorError::MalformedChecklist` when it exists but does
/// not parse.
pub fn read_checklist(path: &Path) -> Result<Option<Checklist>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "checklist not found");
            return Ok(None);
        }
        Err(err) => {
            return Err(err).with_context(|| format!("read checklist {}", path.display()));
        }
    };
    let checklist: Checklist =
        serde_json::from_str(&contents).map_err(|err| SupervisorError::MalformedChecklist {
            path: path.to_path_buf(),
            reason: format!("parse failed: {err}"),
        })?;
    debug!(
        path = %path.display(),
        items = checklist.len(),
        passing = checklist.passing(),
        "checklist loaded"
    );
    Ok(Some(checklist))
}

/// Checklist reader that also enforces the append/flip-only contract between
/// consecutive loads within one process.
#[derive(Debug, Clone)]
pub struct ChecklistStore {
    path: PathBuf,
    baseline: Option<Checklist>,
}

impl ChecklistStore {
    pub fn new(project_dir: &Path, file_name: &str) -> Self {
        Self {
            path: project_dir.join(file_name),
            baseline: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checklist and compare it with the previous successful load.
    ///
    /// A checklist that disappears, shrinks, grows, reorders, rewrites an item
    /// or un-passes an item is reported as `MalformedChecklist`.
    pub fn load(&mut self) -> Result<Option<Checklist>> {
        let current = read_checklist(&self.path)?;
        match (&self.baseline, &current) {
            (Some(_), None) => {
                return Err(self.malformed("checklist file was removed".to_string()).into());
            }
            (Some(prev), Some(next)) => {
                let errors = check_checklist_transition(prev, next);
                if !errors.is_empty() {
                    return Err(self.malformed(errors.join("; ")).into());
                }
            }
            (None, _) => {}
        }
        if current.is_some() {
            self.baseline.clone_from(&current);
        }
        Ok(current)
    }

    fn malformed(&self, reason: String) -> SupervisorError {
        SupervisorError::MalformedChecklist {
            path: self.path.clone(),
            reason,
        }
    }
}
