//! Command execution in the watch directory.
//!
//! Every external program gitdrive runs goes through a [`CommandRunner`]
//! bound to one working directory. Arguments are passed as a vector, never
//! through a shell, so paths and messages need no quoting.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::errors::ExecError;

/// Captured result of a finished command, whatever its exit status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// A successful result with the given stdout.
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// A failed result with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(code),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stdout followed by stderr, as one string.
    pub fn combined(&self) -> String {
        let mut out = self.stdout_lossy();
        out.push_str(&String::from_utf8_lossy(&self.stderr));
        out
    }
}

/// Render a program and its arguments as a single line for logs and errors.
pub fn command_line(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            line.push_str(&format!("'{}'", arg));
        } else {
            line.push_str(arg);
        }
    }
    line
}

/// Runs one command at a time in a fixed working directory.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// The directory every command runs in.
    fn work_dir(&self) -> &Path;

    /// Run `program` with `args` to completion.
    ///
    /// A non-zero exit is not an error at this level; callers inspect
    /// [`CommandOutput::code`]. Errors are reserved for failing to start the
    /// process, cancellation and timeouts.
    async fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput, ExecError>;
}

/// Production [`CommandRunner`] spawning real processes with `tokio`.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    work_dir: PathBuf,
    shutdown: CancellationToken,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(work_dir: impl Into<PathBuf>, shutdown: CancellationToken) -> Self {
        Self {
            work_dir: work_dir.into(),
            shutdown,
            timeout: None,
        }
    }

    /// Kill commands that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput, ExecError> {
        let line = command_line(program, args);
        debug!(cwd = %self.work_dir.display(), "{}", line);

        if self.shutdown.is_cancelled() {
            return Err(ExecError::Cancelled { command: line });
        }

        let child = Command::new(program)
            .args(args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::SpawnFailed {
                command: line.clone(),
                source,
            })?;

        let wait = child.wait_with_output();
        let finished = match self.timeout {
            Some(limit) => tokio::select! {
                res = tokio::time::timeout(limit, wait) => match res {
                    Ok(res) => res,
                    Err(_) => return Err(ExecError::TimedOut { command: line, timeout: limit }),
                },
                _ = self.shutdown.cancelled() => return Err(ExecError::Cancelled { command: line }),
            },
            None => tokio::select! {
                res = wait => res,
                _ = self.shutdown.cancelled() => return Err(ExecError::Cancelled { command: line }),
            },
        };

        let output = finished.map_err(|source| ExecError::SpawnFailed {
            command: line.clone(),
            source,
        })?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        };
        trace!(code = ?result.code, output = %result.combined(), "command finished");
        Ok(result)
    }
}
