//! Typed git commands on top of a [`CommandRunner`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::{ExecError, SyncError};
use crate::exec::{command_line, CommandOutput, CommandRunner};

/// One of the three versions of a conflicted file kept in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Common ancestor.
    Base = 1,
    /// "ours": during a rebase, the upstream side.
    Ours = 2,
    /// "theirs": during a rebase, the local commit being replayed.
    Theirs = 3,
}

/// git CLI wrapper bound to the watch directory.
#[derive(Clone)]
pub struct Git {
    runner: Arc<dyn CommandRunner>,
}

impl Git {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    pub fn work_dir(&self) -> &Path {
        self.runner.work_dir()
    }

    /// Run a git command and fail on a non-zero exit.
    pub async fn run(&self, args: &[&str]) -> Result<CommandOutput, ExecError> {
        let args = to_args(args);
        let output = self.runner.execute("git", &args).await?;
        if output.success() {
            return Ok(output);
        }
        let command = command_line("git", &args);
        warn!(command = %command, code = ?output.code, "git command failed");
        Err(ExecError::CommandFailed {
            command,
            code: output.code,
            output: output.combined(),
        })
    }

    /// Run a git command and accept any exit status.
    pub async fn run_unchecked(&self, args: &[&str]) -> Result<CommandOutput, ExecError> {
        self.runner.execute("git", &to_args(args)).await
    }

    pub async fn checkout(&self, branch: &str) -> Result<(), ExecError> {
        self.run(&["checkout", branch]).await.map(|_| ())
    }

    /// Tracked files whose working copy differs from the index. Untracked
    /// files are never listed.
    pub async fn modified_files(&self) -> Result<Vec<String>, ExecError> {
        let out = self.run(&["ls-files", "-z", "--modified"]).await?;
        let mut files = nul_separated(&out);
        files.dedup();
        Ok(files)
    }

    pub async fn add(&self, paths: &[String]) -> Result<(), ExecError> {
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run(&args).await.map(|_| ())
    }

    pub async fn commit(&self, message: &str) -> Result<(), ExecError> {
        self.run(&["commit", "-m", message]).await.map(|_| ())
    }

    /// Whether the remote answers a lightweight ref listing.
    pub async fn remote_reachable(&self, remote: &str) -> bool {
        match self.run(&["ls-remote", "--exit-code", "--heads", remote]).await {
            Ok(_) => true,
            Err(e) => {
                debug!(remote, error = %e, "remote listing failed");
                false
            }
        }
    }

    pub async fn fetch(&self, remote: &str, branch: &str) -> Result<(), ExecError> {
        self.run(&["fetch", remote, branch]).await.map(|_| ())
    }

    /// Number of commits reachable from `to` but not from `from`.
    pub async fn rev_list_count(&self, from: &str, to: &str) -> Result<u64, SyncError> {
        let range = format!("{}..{}", from, to);
        let out = self.run(&["rev-list", "--count", &range]).await?;
        let text = out.stdout_lossy();
        text.trim().parse::<u64>().map_err(|_| SyncError::InvalidCount {
            command: format!("git rev-list --count {}", range),
            output: text,
        })
    }

    /// Start rebasing onto `upstream`. Stopping on conflicts is expected, so
    /// the exit status is ignored.
    pub async fn rebase(&self, upstream: &str) -> Result<CommandOutput, ExecError> {
        self.run_unchecked(&["rebase", upstream]).await
    }

    /// Advance the rebase to the next commit. Stopping on that commit's
    /// conflicts is reported through the exit status, not as an error.
    pub async fn rebase_continue(&self) -> Result<CommandOutput, ExecError> {
        self.run_unchecked(&["-c", "core.editor=true", "rebase", "--continue"])
            .await
    }

    /// Drop the current (empty) commit and move on. May stop on conflicts.
    pub async fn rebase_skip(&self) -> Result<CommandOutput, ExecError> {
        self.run_unchecked(&["rebase", "--skip"]).await
    }

    /// Whether a rebase is stopped mid-way in the watch directory.
    pub fn rebase_in_progress(&self) -> Result<bool, ExecError> {
        let dirs = GitDirs::resolve(self.work_dir()).map_err(|source| ExecError::Io {
            path: self.work_dir().join(".git"),
            source,
        })?;
        Ok(dirs.git_dir.join("rebase-merge").is_dir() || dirs.git_dir.join("rebase-apply").is_dir())
    }

    pub async fn rebase_abort(&self) -> Result<(), ExecError> {
        self.run(&["rebase", "--abort"]).await.map(|_| ())
    }

    /// Paths currently marked as unmerged.
    pub async fn unmerged_files(&self) -> Result<Vec<String>, ExecError> {
        let out = self
            .run(&["diff", "-z", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(nul_separated(&out))
    }

    /// Contents of `path` at the given index stage.
    pub async fn show_stage(&self, stage: Stage, path: &str) -> Result<Vec<u8>, ExecError> {
        let object = format!(":{}:{}", stage as u8, path);
        self.run(&["show", &object]).await.map(|out| out.stdout)
    }

    /// Three-way merge of the given files, returning the merged text.
    pub async fn merge_file(
        &self,
        side_flag: &str,
        ours: &str,
        base: &str,
        theirs: &str,
    ) -> Result<Vec<u8>, ExecError> {
        self.run(&["merge-file", "-p", side_flag, ours, base, theirs])
            .await
            .map(|out| out.stdout)
    }

    pub async fn push(&self, remote: &str, branch: &str) -> Result<(), ExecError> {
        self.run(&["push", remote, branch]).await.map(|_| ())
    }
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Paths from a `-z` listing. Names are taken verbatim: no quoting, no
/// trimming.
fn nul_separated(out: &CommandOutput) -> Vec<String> {
    out.stdout
        .split(|&b| b == 0)
        .filter(|p| !p.is_empty())
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .collect()
}

/// Where git keeps a working directory's metadata.
///
/// `.git` is a directory in a plain clone and a `gitdir: <path>` file in
/// linked worktrees and submodules. Worktrees also carry a `commondir` file
/// pointing at the repository that holds the shared refs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitDirs {
    /// Per-worktree state such as `HEAD` and an in-progress rebase.
    pub git_dir: PathBuf,
    /// Shared state: `refs/` and `packed-refs`.
    pub common_dir: PathBuf,
}

impl GitDirs {
    pub fn resolve(work_dir: &Path) -> std::io::Result<Self> {
        let dot_git = work_dir.join(".git");
        let git_dir = if dot_git.is_file() {
            let contents = std::fs::read_to_string(&dot_git)?;
            let target = contents
                .lines()
                .find_map(|l| l.strip_prefix("gitdir:"))
                .map(str::trim)
                .ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("{}: missing gitdir line", dot_git.display()),
                    )
                })?;
            work_dir.join(target)
        } else {
            dot_git
        };

        let common_dir = match std::fs::read_to_string(git_dir.join("commondir")) {
            Ok(rel) => git_dir.join(rel.trim()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => git_dir.clone(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            git_dir,
            common_dir,
        })
    }
}
