//! Automatic resolution of rebase conflicts.
//!
//! Each conflicted path is rebuilt from its three index stages with
//! `git merge-file`, letting the configured [`ConflictPolicy`] pick the side
//! of every conflicting hunk. After a pass over all conflicted paths the
//! rebase is advanced, which may stop again on the next commit; the loop
//! ends once nothing is unmerged.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::config::ConflictPolicy;
use crate::errors::{ExecError, SyncError};
use crate::exec::CommandOutput;
use crate::git::{Git, Stage};

/// Resolve conflicts until the rebase stops producing them. Returns the
/// number of files resolved.
#[instrument(skip(git), fields(policy = %policy))]
pub async fn resolve_conflicts(git: &Git, policy: ConflictPolicy) -> Result<usize, SyncError> {
    let mut resolved = 0;
    loop {
        let conflicts = git.unmerged_files().await?;
        if conflicts.is_empty() {
            debug!(resolved, "no more conflicts");
            return Ok(resolved);
        }

        info!(count = conflicts.len(), "resolving conflicts");
        for path in &conflicts {
            resolve_file(git, path, policy)
                .await
                .map_err(|source| SyncError::ConflictResolution {
                    path: path.clone(),
                    source,
                })?;
            resolved += 1;
        }

        advance(git).await?;
    }
}

/// Rebuild one conflicted file and mark it resolved.
async fn resolve_file(git: &Git, path: &str, policy: ConflictPolicy) -> Result<(), ExecError> {
    debug!(path, "resolving conflict");
    let work_dir = git.work_dir().to_path_buf();
    let scratch = ScratchFiles::new(&work_dir, path);

    for (stage, file) in scratch.stages() {
        let content = git.show_stage(stage, path).await?;
        write_file(&work_dir.join(&file), &content).await?;
    }

    let merged = git
        .merge_file(
            policy.merge_file_flag(),
            &scratch.ours,
            &scratch.common,
            &scratch.theirs,
        )
        .await?;
    write_file(&work_dir.join(path), &merged).await?;

    git.add(&[path.to_string()]).await
}

/// Move the rebase past the commit whose conflicts were just resolved.
async fn advance(git: &Git) -> Result<(), SyncError> {
    let out = git.rebase_continue().await?;
    if out.success() {
        return Ok(());
    }

    // The next commit stopped on conflicts of its own.
    if !git.unmerged_files().await?.is_empty() {
        return Ok(());
    }

    if resolution_emptied_commit(&out) {
        info!("resolved commit is empty, skipping it");
        let skipped = git.rebase_skip().await?;
        if skipped.success() || !git.unmerged_files().await?.is_empty() {
            return Ok(());
        }
        return Err(SyncError::RebaseContinue(failure("git rebase --skip", skipped)));
    }

    warn!(code = ?out.code, "rebase --continue failed");
    Err(SyncError::RebaseContinue(failure(
        "git -c core.editor=true rebase --continue",
        out,
    )))
}

fn resolution_emptied_commit(out: &CommandOutput) -> bool {
    let text = out.combined();
    ["nothing to commit", "No changes", "is now empty"]
        .iter()
        .any(|needle| text.contains(needle))
}

fn failure(command: &str, out: CommandOutput) -> ExecError {
    ExecError::CommandFailed {
        command: command.to_string(),
        code: out.code,
        output: out.combined(),
    }
}

async fn write_file(path: &Path, content: &[u8]) -> Result<(), ExecError> {
    tokio::fs::write(path, content)
        .await
        .map_err(|source| ExecError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// The `<path>.common`, `<path>.ours` and `<path>.theirs` extraction files
/// for one conflicted path, removed again on drop.
struct ScratchFiles {
    root: PathBuf,
    common: String,
    ours: String,
    theirs: String,
}

impl ScratchFiles {
    fn new(root: &Path, path: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            common: format!("{}.common", path),
            ours: format!("{}.ours", path),
            theirs: format!("{}.theirs", path),
        }
    }

    fn stages(&self) -> [(Stage, String); 3] {
        [
            (Stage::Base, self.common.clone()),
            (Stage::Ours, self.ours.clone()),
            (Stage::Theirs, self.theirs.clone()),
        ]
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for file in [&self.common, &self.ours, &self.theirs] {
            let full = self.root.join(file);
            match std::fs::remove_file(&full) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %full.display(), error = %e, "failed to remove scratch file"),
            }
        }
    }
}
