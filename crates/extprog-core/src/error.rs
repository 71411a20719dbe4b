//! Error types for extprog

use crate::diag::{Diagnostic, Severity};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to {action} {path}: {source}")]
    DirectoryCreation {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed converting {path:?} to an absolute path: {source}")]
    PathResolution {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no program to execute")]
    ProgramMissing,

    #[error("program lookup failed for {program}: {reason}")]
    ProgramLookup { program: String, reason: String },

    #[error("{label} failed: {state}")]
    ProgramExecution {
        label: String,
        command: String,
        state: String,
        output: String,
    },

    #[error("unexpected output from {program}: {reason}")]
    MalformedOutput {
        program: String,
        expected: &'static str,
        reason: String,
    },

    #[error("{label} did not write a resource id")]
    MissingIdentity { label: String },

    #[error("nothing to import for id {id}")]
    ImportMissing { id: String },

    #[error("file {path} is missing: {source}")]
    MissingFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to {action} {path}: {source}")]
    FileAccess {
        action: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to clean up temporary directory {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{label} was cancelled")]
    Cancelled { label: String },

    #[error("{label} timed out after {secs}s")]
    TimedOut { label: String, secs: u64 },

    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("query encoding failed: {0}")]
    QueryEncoding(#[from] serde_json::Error),

    #[error("rendering {component} result failed: {source}")]
    ResultRendering {
        component: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

const LOOKUP_REMEDIATION: &str = "\
The program must be accessible according to the platform where the bridge is running.

If the expected program should be automatically found, ensure that it is in an expected \
directory. On Unix-based platforms, these directories are typically searched based on the \
'$PATH' environment variable. On Windows-based platforms, these directories are typically \
searched based on the '%PATH%' environment variable.

If the expected program is relative to the configuration, include the configuration's own \
directory in the program name so that it is found regardless of the current directory, for \
example \"<module-dir>/my-program\".

The program must also be executable. On Unix-based platforms, the file on the filesystem \
must have the executable bit set. On Windows-based platforms, no action is typically necessary.";

impl Error {
    pub fn program_lookup(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProgramLookup {
            program: program.into(),
            reason: reason.into(),
        }
    }

    pub fn program_execution(
        label: impl Into<String>,
        command: impl Into<String>,
        state: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self::ProgramExecution {
            label: label.into(),
            command: command.into(),
            state: state.into(),
            output: output.into(),
        }
    }

    pub fn malformed_output(
        program: impl Into<String>,
        expected: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedOutput {
            program: program.into(),
            expected,
            reason: reason.into(),
        }
    }

    pub fn file_access(action: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileAccess {
            action: action.into(),
            path: path.into(),
            source,
        }
    }

    /// Warnings never change the outcome of the operation that produced them.
    pub fn severity(&self) -> Severity {
        match self {
            Self::MissingFile { .. } | Self::Cleanup { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Self::DirectoryCreation { action, path, .. } => {
                format!("Error when trying to {} {}", action, path.display())
            }
            Self::PathResolution { path, .. } => {
                format!("Failed converting {:?} to absolute path", path)
            }
            Self::ProgramMissing => "External Program Missing".into(),
            Self::ProgramLookup { .. } => "External Program Lookup Failed".into(),
            Self::ProgramExecution { label, .. } => format!("Error when running {}", label),
            Self::MalformedOutput { .. } => "Unexpected External Program Results".into(),
            Self::MissingIdentity { label } => format!("Missing resource id after {}", label),
            Self::ImportMissing { .. } => "Cannot import non-existent remote object".into(),
            Self::MissingFile { path, .. } => {
                format!("Error retrieving file information for {}", path.display())
            }
            Self::FileAccess { action, path, .. } => {
                format!("Error when trying to {} {}", action, path.display())
            }
            Self::Cleanup { path, .. } => {
                format!("Error when cleaning up temporary directory {}", path.display())
            }
            Self::Cancelled { label } => format!("Cancelled while running {}", label),
            Self::TimedOut { label, .. } => format!("Timeout while running {}", label),
            Self::UnknownAttribute(name) => format!("Unknown attribute {}", name),
            Self::QueryEncoding(_) => "Query Handling Failed".into(),
            Self::ResultRendering { .. } => "Result Handling Failed".into(),
            Self::ConfigError(_) => "Invalid Configuration".into(),
            Self::IoError(_) => "Unexpected I/O Error".into(),
        }
    }

    /// Detail text for operators. Captured output is included verbatim.
    pub fn detail(&self) -> String {
        match self {
            Self::ProgramMissing => "The resource was configured without a program to execute. \
                Verify the configuration contains at least one non-empty value."
                .into(),
            Self::ProgramLookup { program, reason } => format!(
                "An unexpected error occurred while attempting to find the program.\n\n{}\n\nPlatform: {}\nProgram: {}\nError: {}",
                LOOKUP_REMEDIATION,
                std::env::consts::OS,
                program,
                reason
            ),
            Self::ProgramExecution {
                command,
                state,
                output,
                ..
            } => {
                if output.is_empty() {
                    format!(
                        "The program was executed, however it returned no additional error messaging.\n\nProgram: {}\nState: {}",
                        command, state
                    )
                } else {
                    format!(
                        "An unexpected error occurred while executing the program.\n\nProgram: {}\nError Message: {}\nState: {}",
                        command, output, state
                    )
                }
            }
            Self::MalformedOutput {
                program,
                expected,
                reason,
            } => format!(
                "Program output must be {}.\n\nIf the error is unclear, the output can be viewed by \
                 enabling trace logging (RUST_LOG=extprog=trace).\n\nProgram: {}\nResult Error: {}",
                expected, program, reason
            ),
            Self::MissingIdentity { .. } => "The program completed successfully but left the `id` file empty, \
                so the resource is considered not created. Write a non-empty identifier to \
                $TF_EXTERNAL_DIR/id before exiting."
                .into(),
            Self::ImportMissing { id } => format!(
                "The read program cleared the id, so no object exists for {:?}. Check the id and \
                 that program_read recognises it.",
                id
            ),
            Self::Cancelled { .. } => "The operation was interrupted and the program was terminated.".into(),
            Self::TimedOut { secs, .. } => format!(
                "The program did not exit within {}s and was terminated. Raise timeout_secs in the \
                 bridge configuration if the program legitimately needs longer.",
                secs
            ),
            Self::QueryEncoding(e) => format!(
                "An unexpected error occurred while encoding the query. This is always a bug in \
                 the bridge and should be reported.\n\nError: {}",
                e
            ),
            Self::ResultRendering { component, source } => format!(
                "The program's result was valid but could not be rendered as the {} state. This is \
                 always a bug in the bridge and should be reported.\n\nError: {}",
                component, source
            ),
            Self::DirectoryCreation { source, .. }
            | Self::PathResolution { source, .. }
            | Self::MissingFile { source, .. }
            | Self::FileAccess { source, .. }
            | Self::Cleanup { source, .. } => source.to_string(),
            Self::UnknownAttribute(name) => format!("No attribute named {:?} exists on the resource.", name),
            Self::ConfigError(msg) => msg.clone(),
            Self::IoError(e) => e.to_string(),
        }
    }

    /// Attribute the diagnostic points at, if any.
    pub fn attribute(&self) -> Option<&'static str> {
        match self {
            Self::ProgramMissing
            | Self::ProgramLookup { .. }
            | Self::ProgramExecution { .. }
            | Self::MalformedOutput { .. } => Some("program"),
            Self::QueryEncoding(_) => Some("query"),
            Self::ResultRendering { .. } => Some("result"),
            Self::MissingIdentity { .. } | Self::ImportMissing { .. } => Some("id"),
            _ => None,
        }
    }
}

impl From<Error> for Diagnostic {
    fn from(err: Error) -> Self {
        Diagnostic {
            severity: err.severity(),
            summary: err.summary(),
            detail: err.detail(),
            attribute: err.attribute().map(String::from),
        }
    }
}
