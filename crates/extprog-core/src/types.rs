//! Core types for extprog

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Unix permission bits for a managed file.
pub type FileMode = u32;

/// Lifecycle verb invoked by the host engine.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Create,
    Read,
    Update,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Verb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "read" => Ok(Self::Read),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::ConfigError(format!("unknown verb: {}", other))),
        }
    }
}

/// Files living in an interchange directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManagedFile {
    Input,           // caller input
    InputSensitive,  // caller input, never logged
    Id,              // resource identity
    State,           // managed state blob
    OldState,        // previous state snapshot
    Output,          // computed output
    OutputSensitive, // computed output, never logged
    Stdall,          // combined stdout/stderr
    Stdout,          // split capture
    Stderr,          // split capture
}

impl ManagedFile {
    pub const FIELDS: [ManagedFile; 7] = [
        Self::Input,
        Self::InputSensitive,
        Self::Id,
        Self::State,
        Self::OldState,
        Self::Output,
        Self::OutputSensitive,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::InputSensitive => "input_sensitive",
            Self::Id => "id",
            Self::State => "state",
            Self::OldState => "old_state",
            Self::Output => "output",
            Self::OutputSensitive => "output_sensitive",
            Self::Stdall => "stdall",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }

    /// Mode encoding the file's read/write contract with the program.
    pub fn default_mode(&self) -> FileMode {
        match self {
            Self::Input | Self::InputSensitive | Self::OldState => 0o400,
            Self::Output | Self::OutputSensitive => 0o200,
            Self::Id | Self::State | Self::Stdall | Self::Stdout | Self::Stderr => 0o600,
        }
    }

    pub fn is_sensitive(&self) -> bool {
        matches!(self, Self::InputSensitive | Self::OutputSensitive)
    }
}

impl std::fmt::Display for ManagedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How the executor captures the program's stdout and stderr.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    #[default]
    Combined,
    Split,
}

impl CaptureMode {
    pub fn files(&self) -> &'static [ManagedFile] {
        match self {
            Self::Combined => &[ManagedFile::Stdall],
            Self::Split => &[ManagedFile::Stdout, ManagedFile::Stderr],
        }
    }
}

/// Whether an interchange directory survives `close`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Retention {
    pub keep_always: bool,
    pub keep_on_error: bool,
}

impl Retention {
    pub fn keeps(&self, had_error: bool) -> bool {
        self.keep_always || (self.keep_on_error && had_error)
    }
}

/// A program plus its arguments. Never empty; empty elements are dropped on
/// construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Option<String>>", into = "Vec<String>")]
pub struct CommandSpec(Vec<String>);

impl CommandSpec {
    /// Build from raw list elements, dropping nulls and empty strings.
    pub fn from_parts<I, S>(parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        let filtered: Vec<String> = parts
            .into_iter()
            .flatten()
            .map(Into::into)
            .filter(|s: &String| !s.is_empty())
            .collect();
        if filtered.is_empty() {
            return Err(Error::ProgramMissing);
        }
        Ok(Self(filtered))
    }

    pub fn new<I, S>(parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_parts(parts.into_iter().map(Some))
    }

    pub fn program(&self) -> &str {
        &self.0[0]
    }

    pub fn args(&self) -> &[String] {
        &self.0[1..]
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// JSON rendering of the argument vector, used in diagnostics and logs.
    pub fn display(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| self.0.join(" "))
    }
}

impl TryFrom<Vec<Option<String>>> for CommandSpec {
    type Error = Error;

    fn try_from(parts: Vec<Option<String>>) -> Result<Self> {
        Self::from_parts(parts)
    }
}

impl From<CommandSpec> for Vec<String> {
    fn from(spec: CommandSpec) -> Self {
        spec.0
    }
}
