//! Managed resource attributes as seen by the lifecycle protocol

use crate::diag::Diagnostic;
use crate::error::{Error, Result};
use crate::types::{CaptureMode, CommandSpec, Retention, Verb};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Attributes of one managed resource instance.
///
/// `id` empty means the resource does not exist. `prior_state` is the value of
/// `state` before the change being applied, when the host has one.
#[derive(Clone, Serialize, Deserialize)]
pub struct ResourceData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub input_sensitive: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_state: Option<String>,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub output_sensitive: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_create: Option<CommandSpec>,
    pub program_read: CommandSpec,
    pub program_update: CommandSpec,
    pub program_delete: CommandSpec,

    #[serde(flatten)]
    pub options: ProgramOptions,
}

impl ResourceData {
    pub fn new(program_read: CommandSpec, program_update: CommandSpec, program_delete: CommandSpec) -> Self {
        Self {
            id: String::new(),
            input: String::new(),
            input_sensitive: String::new(),
            state: String::new(),
            prior_state: None,
            output: String::new(),
            output_sensitive: String::new(),
            program_create: None,
            program_read,
            program_update,
            program_delete,
            options: ProgramOptions::default(),
        }
    }

    pub fn exists(&self) -> bool {
        !self.id.is_empty()
    }

    /// Command to run for `verb` plus the label used in diagnostics.
    ///
    /// Only create has a fallback: without `program_create` it runs
    /// `program_update`.
    pub fn program_for(&self, verb: Verb) -> (String, &CommandSpec) {
        match verb {
            Verb::Create => match &self.program_create {
                Some(spec) => ("create>create".into(), spec),
                None => ("create>update".into(), &self.program_update),
            },
            Verb::Read => ("read".into(), &self.program_read),
            Verb::Update => ("update".into(), &self.program_update),
            Verb::Delete => ("delete".into(), &self.program_delete),
        }
    }

    /// State before the pending change; falls back to the current state.
    pub fn old_state(&self) -> &str {
        self.prior_state.as_deref().unwrap_or(&self.state)
    }

    /// Store a value read back from the program. Only computed attributes can
    /// be set this way.
    pub fn set_attribute(&mut self, name: &str, value: String) -> Result<()> {
        match name {
            "id" => self.id = value,
            "state" => self.state = value,
            "output" => self.output = value,
            "output_sensitive" => self.output_sensitive = value,
            other => return Err(Error::UnknownAttribute(other.to_string())),
        }
        Ok(())
    }
}

impl std::fmt::Debug for ResourceData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceData")
            .field("id", &self.id)
            .field("input", &self.input)
            .field("input_sensitive", &"<sensitive>")
            .field("state", &self.state)
            .field("prior_state", &self.prior_state)
            .field("output", &self.output)
            .field("output_sensitive", &"<sensitive>")
            .field("program_create", &self.program_create)
            .field("program_read", &self.program_read)
            .field("program_update", &self.program_update)
            .field("program_delete", &self.program_delete)
            .field("options", &self.options)
            .finish()
    }
}

/// Execution options shared by all verbs of a resource.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProgramOptions {
    /// Pinned interchange directory. Empty means a fresh one per step.
    pub program_tmpdir: String,
    /// Deprecated spelling of `program_tmpdir` from the combined-output-only schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_tmp_dir: Option<String>,
    pub program_tmpdir_keep: bool,
    pub program_tmpdir_keep_on_error: bool,
    pub program_output_combined: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl Default for ProgramOptions {
    fn default() -> Self {
        Self {
            program_tmpdir: String::new(),
            program_tmp_dir: None,
            program_tmpdir_keep: false,
            program_tmpdir_keep_on_error: false,
            program_output_combined: true,
            working_dir: None,
        }
    }
}

impl ProgramOptions {
    pub fn capture_mode(&self) -> CaptureMode {
        if self.program_output_combined {
            CaptureMode::Combined
        } else {
            CaptureMode::Split
        }
    }

    pub fn retention(&self) -> Retention {
        Retention {
            keep_always: self.program_tmpdir_keep,
            keep_on_error: self.program_tmpdir_keep_on_error,
        }
    }

    /// Pinned directory, if any, plus a warning when it came from the
    /// deprecated attribute.
    pub fn pinned_dir(&self) -> (Option<PathBuf>, Option<Diagnostic>) {
        if !self.program_tmpdir.is_empty() {
            return (Some(PathBuf::from(&self.program_tmpdir)), None);
        }
        match self.program_tmp_dir.as_deref() {
            Some(dir) if !dir.is_empty() => (
                Some(PathBuf::from(dir)),
                Some(
                    Diagnostic::warning(
                        "Deprecated attribute program_tmp_dir",
                        "program_tmp_dir is a deprecated alias; use program_tmpdir instead.",
                    )
                    .with_attribute("program_tmp_dir"),
                ),
            ),
            _ => (None, None),
        }
    }
}
