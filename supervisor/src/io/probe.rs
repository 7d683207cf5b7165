//! Startup probe: rebuilds `RunState` from the project directory.
//!
//! The filesystem is the only durable state. Two markers matter: the
//! checklist file (initialization has run) and the agent's progress notes
//! (at least one session left a handoff).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::types::RunState;

/// What the probe found, beyond the reconstructed run state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectProbe {
    pub run_state: RunState,
    /// The agent's progress notes exist.
    pub has_progress_marker: bool,
    /// The project directory did not exist and was created.
    pub created_project_dir: bool,
}

pub struct ProbeRequest<'a> {
    pub project_dir: &'a Path,
    pub prompts_dir: &'a Path,
    pub max_iterations: Option<u32>,
    pub checklist_file: &'a str,
    pub progress_file: &'a str,
}

pub fn probe_project(request: &ProbeRequest<'_>) -> Result<ProjectProbe> {
    let project_dir = request.project_dir;
    let created_project_dir = !project_dir.exists();
    if created_project_dir {
        fs::create_dir_all(project_dir)
            .with_context(|| format!("create project directory {}", project_dir.display()))?;
        info!(project_dir = %project_dir.display(), "created project directory");
    }

    let initialized = project_dir.join(request.checklist_file).is_file();
    let has_progress_marker = project_dir.join(request.progress_file).is_file();
    debug!(initialized, has_progress_marker, "project probed");

    Ok(ProjectProbe {
        run_state: RunState {
            project_dir: project_dir.to_path_buf(),
            prompts_dir: request.prompts_dir.to_path_buf(),
            iteration: 0,
            max_iterations: request.max_iterations,
            initialized,
        },
        has_progress_marker,
        created_project_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{checklist, write_checklist};

    fn request<'a>(project_dir: &'a Path, prompts_dir: &'a Path) -> ProbeRequest<'a> {
        ProbeRequest {
            project_dir,
            prompts_dir,
            max_iterations: Some(3),
            checklist_file: "feature_list.json",
            progress_file: "claude-progress.txt",
        }
    }

    #[test]
    fn fresh_project_is_created_and_uninitialized() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = temp.path().join("generations").join("app");
        let probe = probe_project(&request(&project, temp.path())).expect("probe");
        assert!(probe.created_project_dir);
        assert!(project.is_dir());
        assert!(!probe.run_state.initialized);
        assert_eq!(probe.run_state.iteration, 0);
        assert_eq!(probe.run_state.max_iterations, Some(3));
    }

    #[test]
    fn existing_checklist_marks_initialized() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_checklist(&temp.path().join("feature_list.json"), &checklist(2, 0));
        fs::write(temp.path().join("claude-progress.txt"), "session 1 notes").expect("write");
        let probe = probe_project(&request(temp.path(), temp.path())).expect("probe");
        assert!(!probe.created_project_dir);
        assert!(probe.run_state.initialized);
        assert!(probe.has_progress_marker);
    }

    #[test]
    fn probing_twice_yields_identical_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_checklist(&temp.path().join("feature_list.json"), &checklist(2, 1));
        let first = probe_project(&request(temp.path(), temp.path())).expect("probe");
        let second = probe_project(&request(temp.path(), temp.path())).expect("probe");
        assert_eq!(first, second);
    }
}
