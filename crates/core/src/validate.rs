//! One-time startup checks on the watch directory.
//!
//! Checks run in a fixed order and the first failure is returned:
//! directory exists, `git` is on `PATH`, `.git` exists, the remote has refs,
//! the branch exists. `.git` may be a `gitdir:` file, as in linked worktrees
//! and submodules; refs are then looked up in the repository it points to.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::errors::ValidationError;
use crate::git::GitDirs;

/// Validate `config` against the filesystem and the process `PATH`.
pub fn validate(config: &SyncConfig) -> Result<(), ValidationError> {
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    validate_with_path(config, &path_var)
}

/// Like [`validate`] but searches `path_var` for the git executable.
pub fn validate_with_path(config: &SyncConfig, path_var: &OsStr) -> Result<(), ValidationError> {
    let watch_dir = &config.watch_dir;

    let meta = std::fs::metadata(watch_dir).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ValidationError::WatchDirMissing(watch_dir.clone())
        } else {
            ValidationError::Io {
                path: watch_dir.clone(),
                source,
            }
        }
    })?;
    if !meta.is_dir() {
        return Err(ValidationError::NotADirectory(watch_dir.clone()));
    }

    let git = find_executable("git", path_var).ok_or(ValidationError::GitNotFound)?;
    debug!(git = %git.display(), "found git executable");

    let dot_git = watch_dir.join(".git");
    if !dot_git.exists() {
        return Err(ValidationError::NotAGitRepository(watch_dir.clone()));
    }
    let dirs = GitDirs::resolve(watch_dir).map_err(|source| ValidationError::Io {
        path: dot_git,
        source,
    })?;
    if !dirs.git_dir.is_dir() {
        return Err(ValidationError::NotAGitRepository(watch_dir.clone()));
    }
    debug!(
        git_dir = %dirs.git_dir.display(),
        common_dir = %dirs.common_dir.display(),
        "resolved git directory"
    );
    let git_dir = &dirs.common_dir;

    let packed = read_packed_refs(git_dir)?;

    // remote: .git/refs/remotes/<remote>
    let remote_prefix = format!("refs/remotes/{}/", config.remote);
    if !git_dir.join("refs/remotes").join(&config.remote).is_dir()
        && !packed.iter().any(|r| r.starts_with(&remote_prefix))
    {
        return Err(ValidationError::RemoteNotFound(config.remote.clone()));
    }

    // branch: .git/refs/heads/<branch>
    let branch_ref = format!("refs/heads/{}", config.branch);
    if !git_dir.join("refs/heads").join(&config.branch).is_file()
        && !packed.iter().any(|r| *r == branch_ref)
    {
        return Err(ValidationError::BranchNotFound(config.branch.clone()));
    }

    info!(
        watch_dir = %watch_dir.display(),
        remote = %config.remote,
        branch = %config.branch,
        "watch directory validated"
    );
    Ok(())
}

/// Search `path_var` for an executable file named `name`.
pub fn find_executable(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

/// Ref names listed in `.git/packed-refs`, or nothing if the file is absent.
fn read_packed_refs(git_dir: &Path) -> Result<Vec<String>, ValidationError> {
    let path = git_dir.join("packed-refs");
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(ValidationError::Io { path, source }),
    };
    Ok(contents
        .lines()
        .filter(|l| !l.starts_with('#') && !l.starts_with('^'))
        .filter_map(|l| l.split_whitespace().nth(1))
        .map(String::from)
        .collect())
}
