//! Error types for the gitdrive core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Command execution errors
// ---------------------------------------------------------------------------

/// Errors from running an external command in the watch directory.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The process could not be started at all.
    #[error("failed to run `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command exited with a non-zero status.
    #[error("`{command}` failed (exit {code:?}):\n{output}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        /// Captured stdout followed by stderr.
        output: String,
    },

    /// The command was interrupted by a shutdown request.
    #[error("`{command}` cancelled by shutdown")]
    Cancelled { command: String },

    /// The command did not finish within the configured timeout.
    #[error("`{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    /// Reading or writing a file on behalf of a command failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Startup validation errors
// ---------------------------------------------------------------------------

/// Errors from the one-time startup checks. Each check has its own variant.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("watch directory does not exist: {0}")]
    WatchDirMissing(PathBuf),

    #[error("{0}: not a directory")]
    NotADirectory(PathBuf),

    #[error("git executable not found on PATH")]
    GitNotFound,

    #[error("{0}: not a git repository")]
    NotAGitRepository(PathBuf),

    #[error("{0}: remote does not exist")]
    RemoteNotFound(String),

    #[error("{0}: branch does not exist")]
    BranchNotFound(String),

    #[error("validation I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Errors from a single sync cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Checking out the target branch failed; the cycle stops immediately.
    #[error("checkout of branch '{branch}' failed: {source}")]
    Checkout {
        branch: String,
        #[source]
        source: ExecError,
    },

    /// A git command in one of the protocol phases failed.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// `git rev-list --count` produced something other than a number.
    #[error("unexpected output from `{command}`: {output:?}")]
    InvalidCount { command: String, output: String },

    /// Resolving a conflicted path during rebase failed.
    #[error("failed to resolve conflict in '{path}': {source}")]
    ConflictResolution {
        path: String,
        #[source]
        source: ExecError,
    },

    /// `git rebase` exited non-zero without leaving a rebase in progress,
    /// e.g. an untracked file would be overwritten.
    #[error("rebase onto {upstream} did not start:\n{output}")]
    RebaseNotStarted { upstream: String, output: String },

    /// Advancing the rebase after a resolution pass failed.
    #[error("failed to continue rebase: {0}")]
    RebaseContinue(#[source] ExecError),

    /// Pushing to the remote failed (only raised with `strict_push`).
    #[error("push to {remote}/{branch} failed: {source}")]
    Push {
        remote: String,
        branch: String,
        #[source]
        source: ExecError,
    },

    /// The host name used for the watcher identity could not be read.
    #[error("failed to determine watcher identity: {0}")]
    Identity(#[source] std::io::Error),
}

// ---------------------------------------------------------------------------
// Notification errors
// ---------------------------------------------------------------------------

/// Errors from the notification subsystem.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// The desktop notification could not be delivered.
    #[error("notification delivery failed: {0}")]
    Delivery(#[from] ExecError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// A duration string could not be parsed.
    #[error("invalid duration '{0}' (expected e.g. 90s, 5m, 1h, 2d)")]
    InvalidDuration(String),

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
