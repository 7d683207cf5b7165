//! Prompt set loading and payload assembly.
//!
//! Prompt files are opaque text: they are read once at startup, validated for
//! presence, and concatenated verbatim.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::types::SessionKind;
use crate::error::SupervisorError;

pub const INITIALIZER_PROMPT_FILE: &str = "initializer_prompt.md";
pub const CODING_PROMPT_FILE: &str = "coding_prompt.md";

/// The three documents every session payload is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub initializer: String,
    pub coding: String,
    pub spec: String,
    /// Spec file name, reused for the copy inside the project directory.
    pub spec_file: String,
    spec_path: PathBuf,
}

impl PromptSet {
    /// Read all prompt documents from `prompts_dir`.
    ///
    /// Any missing or unreadable file is a configuration error, reported
    /// before the first session.
    pub fn load(prompts_dir: &Path, spec_file: &str) -> Result<Self, SupervisorError> {
        if !prompts_dir.is_dir() {
            return Err(SupervisorError::Configuration(format!(
                "prompts directory {} does not exist",
                prompts_dir.display()
            )));
        }
        let spec_path = prompts_dir.join(spec_file);
        let set = Self {
            initializer: read_required(&prompts_dir.join(INITIALIZER_PROMPT_FILE))?,
            coding: read_required(&prompts_dir.join(CODING_PROMPT_FILE))?,
            spec: read_required(&spec_path)?,
            spec_file: spec_file.to_string(),
            spec_path,
        };
        debug!(prompts_dir = %prompts_dir.display(), "prompt set loaded");
        Ok(set)
    }

    /// Session payload: the standing instructions for `kind`, then the spec.
    pub fn payload(&self, kind: SessionKind) -> String {
        let instructions = match kind {
            SessionKind::Initialize => &self.initializer,
            SessionKind::Continue => &self.coding,
        };
        let mut payload = String::with_capacity(instructions.len() + self.spec.len() + 2);
        payload.push_str(instructions.trim_end());
        payload.push_str("\n\n");
        payload.push_str(&self.spec);
        payload
    }

    /// Copy the spec into the project so later sessions can re-read it.
    ///
    /// Never overwrites an existing copy. Only called between sessions.
    pub fn copy_spec_to_project(&self, project_dir: &Path) -> Result<bool> {
        let dest = project_dir.join(&self.spec_file);
        if dest.exists() {
            return Ok(false);
        }
        fs::copy(&self.spec_path, &dest).with_context(|| {
            format!(
                "copy {} to {}",
                self.spec_path.display(),
                dest.display()
            )
        })?;
        info!(dest = %dest.display(), "copied project spec into project directory");
        Ok(true)
    }
}

fn read_required(path: &Path) -> Result<String, SupervisorError> {
    fs::read_to_string(path).map_err(|err| {
        SupervisorError::Configuration(format!("read prompt file {}: {err}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_prompts;

    #[test]
    fn payload_uses_initializer_once_and_coding_after() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_prompts(temp.path());
        let set = PromptSet::load(temp.path(), "app_spec.txt").expect("load");

        assert_eq!(
            set.payload(SessionKind::Initialize),
            "initializer instructions\n\nbuild a todo app\n"
        );
        assert_eq!(
            set.payload(SessionKind::Continue),
            "coding instructions\n\nbuild a todo app\n"
        );
    }

    #[test]
    fn missing_prompt_file_is_configuration_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_prompts(temp.path());
        fs::remove_file(temp.path().join(CODING_PROMPT_FILE)).expect("remove");
        let err = PromptSet::load(temp.path(), "app_spec.txt").unwrap_err();
        assert!(err.to_string().contains(CODING_PROMPT_FILE));
    }

    #[test]
    fn missing_directory_is_configuration_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = PromptSet::load(&temp.path().join("nope"), "app_spec.txt").unwrap_err();
        assert!(matches!(err, SupervisorError::Configuration(_)));
    }

    #[test]
    fn spec_copy_does_not_overwrite() {
        let prompts = tempfile::tempdir().expect("tempdir");
        let project = tempfile::tempdir().expect("tempdir");
        write_prompts(prompts.path());
        let set = PromptSet::load(prompts.path(), "app_spec.txt").expect("load");

        assert!(set.copy_spec_to_project(project.path()).expect("copy"));
        fs::write(project.path().join("app_spec.txt"), "agent edited").expect("write");
        assert!(!set.copy_spec_to_project(project.path()).expect("copy"));
        assert_eq!(
            fs::read_to_string(project.path().join("app_spec.txt")).expect("read"),
            "agent edited"
        );
    }
}
