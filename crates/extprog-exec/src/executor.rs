//! Command executor - spawn a program, race it against cancellation and the
//! optional timeout, and collect what it printed.
//!
//! Two shapes are supported. `run_captured` sends stdout/stderr into capture
//! files inside an interchange directory (lifecycle programs). `run_piped`
//! writes a request to stdin and collects stdout (the stateless query
//! protocol). Either way a non-zero exit is a `ProgramExecution` error.

use crate::env::ProgramEnv;
use crate::lookup::resolve_program;
use extprog_core::{CaptureMode, CommandSpec, Error, ManagedFile, Result};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

const CAPTURE_MODE: u32 = 0o600;

/// Output a captured run left behind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapturedOutput {
    Combined(String),
    Split { stdout: String, stderr: String },
}

impl CapturedOutput {
    /// Text surfaced in a failure diagnostic: the combined stream, or stderr
    /// falling back to stdout when split.
    pub fn message(&self) -> &str {
        match self {
            Self::Combined(all) => all,
            Self::Split { stdout, stderr } => {
                if stderr.is_empty() {
                    stdout
                } else {
                    stderr
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct Execution {
    pub program: PathBuf,
    pub status: ExitStatus,
    pub duration: Duration,
    pub output: CapturedOutput,
}

#[derive(Debug)]
pub struct PipedOutput {
    pub status: ExitStatus,
    pub duration: Duration,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// One program invocation. `label` names the step in logs and diagnostics.
pub struct CommandExecutor<'a> {
    label: &'a str,
    spec: &'a CommandSpec,
    env: Option<&'a ProgramEnv>,
    working_dir: Option<&'a Path>,
    timeout: Option<Duration>,
}

impl<'a> CommandExecutor<'a> {
    pub fn new(label: &'a str, spec: &'a CommandSpec) -> Self {
        Self {
            label,
            spec,
            env: None,
            working_dir: None,
            timeout: None,
        }
    }

    pub fn env(mut self, env: &'a ProgramEnv) -> Self {
        self.env = Some(env);
        self
    }

    pub fn working_dir(mut self, dir: Option<&'a Path>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(self.spec.args()).kill_on_drop(true);
        if let Some(dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        if let Some(env) = self.env {
            env.apply(&mut cmd);
        }
        cmd
    }

    /// Run with stdout/stderr redirected into capture files under `dir`.
    /// The program gets no stdin.
    pub async fn run_captured(
        &self,
        dir: &Path,
        capture: CaptureMode,
        cancel: &CancellationToken,
    ) -> Result<Execution> {
        let program = resolve_program(self.spec.program(), self.working_dir)?;
        let mut cmd = self.command(&program);
        cmd.stdin(Stdio::null());

        match capture {
            CaptureMode::Combined => {
                let all = open_capture(&dir.join(ManagedFile::Stdall.name()))?;
                let dup = all
                    .try_clone()
                    .map_err(|e| Error::file_access("duplicate capture handle for", dir.join("stdall"), e))?;
                cmd.stdout(Stdio::from(all)).stderr(Stdio::from(dup));
            }
            CaptureMode::Split => {
                let out = open_capture(&dir.join(ManagedFile::Stdout.name()))?;
                let err = open_capture(&dir.join(ManagedFile::Stderr.name()))?;
                cmd.stdout(Stdio::from(out)).stderr(Stdio::from(err));
            }
        }

        trace!("executing {}: {} ({})", self.label, self.spec.display(), program.display());
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| self.spawn_failed(e))?;

        // The handler of whichever branch wins runs after the others are
        // dropped, so the child can be killed there.
        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| self.spawn_failed(e))?,
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(Error::Cancelled { label: self.label.to_string() });
            }
            _ = deadline(self.timeout) => {
                let _ = child.kill().await;
                return Err(self.timed_out());
            }
        };
        let duration = started.elapsed();
        // Dropping `cmd` closes the parent's copies of the capture handles.
        drop(cmd);

        let output = match capture {
            CaptureMode::Combined => CapturedOutput::Combined(read_capture(dir, ManagedFile::Stdall).await),
            CaptureMode::Split => CapturedOutput::Split {
                stdout: read_capture(dir, ManagedFile::Stdout).await,
                stderr: read_capture(dir, ManagedFile::Stderr).await,
            },
        };
        trace!(
            "{} finished in {:?} with {}; output: {:?}",
            self.label,
            duration,
            status,
            output
        );

        if !status.success() {
            return Err(Error::program_execution(
                self.label,
                self.spec.display(),
                status.to_string(),
                output.message(),
            ));
        }

        Ok(Execution {
            program,
            status,
            duration,
            output,
        })
    }

    /// Run with `input` written to stdin; stdout is returned raw.
    pub async fn run_piped(&self, input: Vec<u8>, cancel: &CancellationToken) -> Result<PipedOutput> {
        let program = resolve_program(self.spec.program(), self.working_dir)?;
        let mut cmd = self.command(&program);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        trace!("executing {}: {} ({})", self.label, self.spec.display(), program.display());
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| self.spawn_failed(e))?;

        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                match stdin.write_all(&input).await {
                    // The program is free to exit without reading its input.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                    other => other,
                }
            })
        });

        // kill_on_drop takes care of the child when a losing branch drops
        // the wait future.
        let output = tokio::select! {
            output = child.wait_with_output() => output.map_err(|e| self.spawn_failed(e))?,
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled { label: self.label.to_string() });
            }
            _ = deadline(self.timeout) => {
                return Err(self.timed_out());
            }
        };
        let duration = started.elapsed();

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("{}: writing stdin failed: {}", self.label, e),
                Err(e) => warn!("{}: stdin writer task failed: {}", self.label, e),
            }
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        trace!(
            "{} finished in {:?} with {}; stdout: {:?}; stderr: {:?}",
            self.label,
            duration,
            output.status,
            String::from_utf8_lossy(&output.stdout),
            stderr
        );

        if !output.status.success() {
            return Err(Error::program_execution(
                self.label,
                self.spec.display(),
                output.status.to_string(),
                stderr,
            ));
        }

        Ok(PipedOutput {
            status: output.status,
            duration,
            stdout: output.stdout,
            stderr,
        })
    }

    fn spawn_failed(&self, e: std::io::Error) -> Error {
        Error::program_execution(self.label, self.spec.display(), e.to_string(), "")
    }

    fn timed_out(&self) -> Error {
        Error::TimedOut {
            label: self.label.to_string(),
            secs: self.timeout.map(|t| t.as_secs()).unwrap_or_default(),
        }
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

fn open_capture(path: &Path) -> Result<std::fs::File> {
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(CAPTURE_MODE);
    }
    opts.open(path)
        .map_err(|e| Error::file_access("open capture file", path, e))
}

async fn read_capture(dir: &Path, file: ManagedFile) -> String {
    let path = dir.join(file.name());
    match tokio::fs::read(&path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            warn!("could not read {}: {}", path.display(), e);
            String::new()
        }
    }
}
