//! The synchronizer: one sync cycle against the configured remote.
//!
//! A cycle runs these phases in order:
//! `checkout → commit local changes → check remote → fetch + rebase → push`
//!
//! Going offline is not a failure: the cycle stops after the local commit.
//! A conflict that cannot be resolved aborts the rebase, but the push check
//! still runs before the error is reported.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SyncConfig;
use crate::conflict::resolve_conflicts;
use crate::errors::{CoreError, SyncError};
use crate::exec::{CommandRunner, ProcessRunner};
use crate::git::Git;
use crate::identity::{commit_message, hostname, watcher_id};
use crate::notify::{build_notifier, Event, Notifier};
use crate::validate::validate;

/// What a single cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Tracked files committed at the start of the cycle.
    pub committed_files: usize,
    /// Whether the remote answered the connectivity check.
    pub online: bool,
    /// Commits on the remote branch missing locally, before the rebase.
    pub remote_commits: u64,
    pub conflicts_resolved: usize,
    /// The rebase was aborted after a failed conflict resolution.
    pub rebase_aborted: bool,
    /// Commits on the local branch missing on the remote, before the push.
    pub local_commits: u64,
    pub pushed: bool,
}

impl CycleReport {
    pub fn changed_anything(&self) -> bool {
        self.committed_files > 0 || self.remote_commits > 0 || self.pushed
    }
}

/// Keeps one watch directory in sync with its remote branch.
pub struct Synchronizer {
    id: String,
    git: Git,
    config: SyncConfig,
    notifier: Box<dyn Notifier>,
}

impl Synchronizer {
    pub fn new(
        config: SyncConfig,
        runner: Arc<dyn CommandRunner>,
        notifier: Box<dyn Notifier>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            git: Git::new(runner),
            config,
            notifier,
        }
    }

    /// Validate the configuration and the watch directory, then wire up real
    /// processes and the notifier chain. Every command the synchronizer
    /// starts is killed once `shutdown` is cancelled.
    pub fn from_config(config: SyncConfig, shutdown: CancellationToken) -> Result<Self, CoreError> {
        config.validate()?;
        validate(&config)?;

        let host = hostname().map_err(SyncError::Identity)?;
        let id = watcher_id(&host, &config.watch_dir);

        let runner: Arc<dyn CommandRunner> = Arc::new(
            ProcessRunner::new(&config.watch_dir, shutdown).with_timeout(config.command_timeout),
        );
        let notifier = build_notifier(config.notify, config.notify_dedup_interval, runner.clone());

        info!(id = %id, "synchronizer ready");
        Ok(Self::new(config, runner, Box::new(notifier), id))
    }

    /// The watcher identity embedded in commit messages.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one sync cycle.
    #[instrument(skip(self), fields(branch = %self.config.branch, remote = %self.config.remote))]
    pub async fn sync_once(&self) -> Result<CycleReport, SyncError> {
        info!("syncing");
        let mut report = CycleReport::default();
        let branch = self.config.branch.as_str();
        let remote = self.config.remote.as_str();

        self.git
            .checkout(branch)
            .await
            .map_err(|source| SyncError::Checkout {
                branch: branch.to_string(),
                source,
            })?;

        report.committed_files = self.commit_local_changes().await?;

        report.online = self.git.remote_reachable(remote).await;
        if !report.online {
            info!("remote unreachable, skipping rebase and push");
            return Ok(report);
        }

        let tracking = format!("{}/{}", remote, branch);
        let deferred = self.rebase_onto_remote(&tracking, &mut report).await?;

        report.local_commits = self.git.rev_list_count(&tracking, branch).await?;
        if report.local_commits == 0 {
            debug!("nothing to push");
        } else {
            self.push(&mut report).await?;
        }

        match deferred {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Send the end-of-cycle notification. Delivery failures are only logged.
    pub async fn notify_finished(&mut self) {
        let message = format!("finished sync of {}", self.config.watch_dir.display());
        if let Err(e) = self.notifier.notify(&Event::sync(), &message).await {
            warn!(error = %e, "failed to deliver notification");
        }
    }

    /// Commit every modified tracked file. Untracked files are left alone.
    #[instrument(skip(self))]
    async fn commit_local_changes(&self) -> Result<usize, SyncError> {
        let modified = self.git.modified_files().await?;
        if modified.is_empty() {
            info!("no local changes");
            return Ok(0);
        }

        info!(files = modified.len(), "committing local changes");
        self.git.add(&modified).await?;
        self.git.commit(&commit_message(&self.id)).await?;
        Ok(modified.len())
    }

    /// Fetch and rebase onto `tracking` when the remote has new commits.
    ///
    /// A failed conflict resolution aborts the rebase and comes back as
    /// `Ok(Some(err))`, so the caller can still push before reporting it.
    /// A rebase git refused to start is reported the same way.
    #[instrument(skip(self, report))]
    async fn rebase_onto_remote(
        &self,
        tracking: &str,
        report: &mut CycleReport,
    ) -> Result<Option<SyncError>, SyncError> {
        debug!("fetching remote changes");
        self.git.fetch(&self.config.remote, &self.config.branch).await?;

        report.remote_commits = self.git.rev_list_count(&self.config.branch, tracking).await?;
        if report.remote_commits == 0 {
            info!("no remote changes");
            return Ok(None);
        }

        info!(commits = report.remote_commits, "rebasing onto remote changes");
        let out = self.git.rebase(tracking).await?;
        if !out.success() {
            if !self.git.rebase_in_progress()? {
                let output = out.combined();
                warn!(code = ?out.code, output = %output.trim(), "rebase failed before it started");
                return Ok(Some(SyncError::RebaseNotStarted {
                    upstream: tracking.to_string(),
                    output,
                }));
            }
            debug!(code = ?out.code, "rebase stopped on conflicts");
        }

        match resolve_conflicts(&self.git, self.config.conflict_policy).await {
            Ok(resolved) => {
                report.conflicts_resolved = resolved;
                Ok(None)
            }
            Err(e) => {
                error!(error = %e, "aborting rebase after failure to resolve conflicts");
                self.git.rebase_abort().await?;
                report.rebase_aborted = true;
                Ok(Some(e))
            }
        }
    }

    #[instrument(skip(self, report))]
    async fn push(&self, report: &mut CycleReport) -> Result<(), SyncError> {
        let remote = &self.config.remote;
        let branch = &self.config.branch;
        debug!(commits = report.local_commits, "pushing local changes");

        match self.git.push(remote, branch).await {
            Ok(()) => {
                report.pushed = true;
                info!(commits = report.local_commits, "pushed local changes");
                Ok(())
            }
            Err(source) if self.config.strict_push => Err(SyncError::Push {
                remote: remote.clone(),
                branch: branch.clone(),
                source,
            }),
            Err(e) => {
                warn!(error = %e, "push failed, retrying next cycle");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConflictPolicy;
    use crate::errors::NotificationError;
    use crate::exec::CommandOutput;
    use crate::test_support::FakeRunner;
    use std::path::Path;
    use std::sync::Mutex;

    const ID: &str = "laptop:/home/me/notes";

    /// Records every delivered message.
    #[derive(Clone, Default)]
    struct Recorded(Arc<Mutex<Vec<String>>>);

    #[async_trait::async_trait]
    impl Notifier for Recorded {
        async fn notify(&mut self, _event: &Event, message: &str) -> Result<(), NotificationError> {
            self.0.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    fn config(dir: &Path) -> SyncConfig {
        SyncConfig {
            watch_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn synchronizer(fake: &Arc<FakeRunner>, config: SyncConfig) -> Synchronizer {
        Synchronizer::new(config, fake.clone(), Box::new(Recorded::default()), ID)
    }

    #[tokio::test]
    async fn test_no_changes_makes_no_commit() {
        let fake = FakeRunner::new("/tmp/notes");
        fake.on("git rev-list", CommandOutput::ok("0\n"));
        let sync = synchronizer(&fake, config(Path::new("/tmp/notes")));

        let report = sync.sync_once().await.unwrap();

        assert_eq!(fake.count("git add"), 0);
        assert_eq!(fake.count("git commit"), 0);
        assert_eq!(report.committed_files, 0);
        assert!(report.online);
        assert!(!report.changed_anything());
    }

    #[tokio::test]
    async fn test_modified_files_are_committed_with_identity() {
        let fake = FakeRunner::new("/tmp/notes");
        fake.on(
            "git ls-files -z --modified",
            CommandOutput::ok("todo.md\0notes/a.md\0"),
        );
        fake.on("git rev-list", CommandOutput::ok("0\n"));
        let sync = synchronizer(&fake, config(Path::new("/tmp/notes")));

        let report = sync.sync_once().await.unwrap();

        assert_eq!(report.committed_files, 2);
        assert_eq!(fake.count("git add -- todo.md notes/a.md"), 1);
        let calls = fake.calls();
        let commit = calls
            .iter()
            .find(|c| c.starts_with("git commit -m"))
            .expect("a commit should be made");
        let message = commit
            .strip_prefix("git commit -m '")
            .and_then(|m| m.strip_suffix('\''))
            .unwrap();
        let stamp = message.strip_prefix(&format!("{ID}: ")).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok(), "{stamp}");
    }

    #[tokio::test]
    async fn test_offline_skips_fetch_rebase_and_push() {
        let fake = FakeRunner::new("/tmp/notes");
        fake.on("git ls-files -z --modified", CommandOutput::ok("todo.md\0"));
        fake.on("git ls-remote", CommandOutput::failed(128, "fatal: unable to access"));
        let sync = synchronizer(&fake, config(Path::new("/tmp/notes")));

        let report = sync.sync_once().await.unwrap();

        assert!(!report.online);
        assert_eq!(report.committed_files, 1);
        assert_eq!(fake.count("git commit"), 1);
        assert_eq!(fake.count("git fetch"), 0);
        assert_eq!(fake.count("git rebase"), 0);
        assert_eq!(fake.count("git push"), 0);
    }

    #[tokio::test]
    async fn test_remote_ahead_without_conflicts_rebases_once() {
        let fake = FakeRunner::new("/tmp/notes");
        fake.on("git rev-list --count master..origin/master", CommandOutput::ok("3\n"));
        fake.on("git rev-list --count origin/master..master", CommandOutput::ok("0\n"));
        let sync = synchronizer(&fake, config(Path::new("/tmp/notes")));

        let report = sync.sync_once().await.unwrap();

        assert_eq!(report.remote_commits, 3);
        assert_eq!(fake.count("git fetch origin master"), 1);
        assert_eq!(fake.count("git rebase origin/master"), 1);
        assert_eq!(fake.count("git show"), 0);
        assert_eq!(fake.count("git merge-file"), 0);
        assert_eq!(fake.count("git push"), 0);
    }

    #[tokio::test]
    async fn test_remote_not_ahead_skips_rebase() {
        let fake = FakeRunner::new("/tmp/notes");
        fake.on("git rev-list", CommandOutput::ok("0\n"));
        let sync = synchronizer(&fake, config(Path::new("/tmp/notes")));

        sync.sync_once().await.unwrap();
        assert_eq!(fake.count("git fetch"), 1);
        assert_eq!(fake.count("git rebase"), 0);
    }

    #[tokio::test]
    async fn test_local_ahead_pushes() {
        let fake = FakeRunner::new("/tmp/notes");
        fake.on("git rev-list --count master..origin/master", CommandOutput::ok("0\n"));
        fake.on("git rev-list --count origin/master..master", CommandOutput::ok("1\n"));
        let sync = synchronizer(&fake, config(Path::new("/tmp/notes")));

        let report = sync.sync_once().await.unwrap();

        assert!(report.pushed);
        assert_eq!(report.local_commits, 1);
        assert_eq!(fake.count("git push origin master"), 1);
    }

    #[tokio::test]
    async fn test_push_failure_is_best_effort_by_default() {
        let fake = FakeRunner::new("/tmp/notes");
        fake.on("git rev-list --count master..origin/master", CommandOutput::ok("0\n"));
        fake.on("git rev-list --count origin/master..master", CommandOutput::ok("2\n"));
        fake.on("git push", CommandOutput::failed(1, "rejected"));
        let sync = synchronizer(&fake, config(Path::new("/tmp/notes")));

        let report = sync.sync_once().await.unwrap();
        assert!(!report.pushed);
    }

    #[tokio::test]
    async fn test_push_failure_is_an_error_with_strict_push() {
        let fake = FakeRunner::new("/tmp/notes");
        fake.on("git rev-list --count master..origin/master", CommandOutput::ok("0\n"));
        fake.on("git rev-list --count origin/master..master", CommandOutput::ok("2\n"));
        fake.on("git push", CommandOutput::failed(1, "rejected"));
        let sync = synchronizer(
            &fake,
            SyncConfig {
                strict_push: true,
                ..config(Path::new("/tmp/notes"))
            },
        );

        let err = sync.sync_once().await.unwrap_err();
        assert!(matches!(err, SyncError::Push { .. }));
    }

    #[tokio::test]
    async fn test_checkout_failure_stops_the_cycle() {
        let fake = FakeRunner::new("/tmp/notes");
        fake.on("git checkout", CommandOutput::failed(1, "error: local changes would be overwritten"));
        let sync = synchronizer(&fake, config(Path::new("/tmp/notes")));

        let err = sync.sync_once().await.unwrap_err();

        assert!(matches!(err, SyncError::Checkout { ref branch, .. } if branch == "master"));
        assert_eq!(fake.calls(), vec!["git checkout master"]);
    }

    #[tokio::test]
    async fn test_failed_resolution_aborts_rebase_and_still_checks_push() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git/rebase-merge")).unwrap();
        let fake = FakeRunner::new(dir.path());
        fake.on("git rev-list --count master..origin/master", CommandOutput::ok("1\n"));
        fake.on("git rev-list --count origin/master..master", CommandOutput::ok("1\n"));
        fake.on("git rebase origin/master", CommandOutput::failed(1, "CONFLICT"));
        fake.on("git diff -z --name-only --diff-filter=U", CommandOutput::ok("todo.md\0"));
        fake.on("git show :2:todo.md", CommandOutput::failed(128, "fatal: bad path"));
        let sync = synchronizer(&fake, config(dir.path()));

        let err = sync.sync_once().await.unwrap_err();

        assert!(matches!(err, SyncError::ConflictResolution { .. }));
        let calls = fake.calls();
        let abort = calls.iter().position(|c| c == "git rebase --abort").unwrap();
        let push_check = calls
            .iter()
            .position(|c| c == "git rev-list --count origin/master..master")
            .unwrap();
        assert!(abort < push_check);
        assert_eq!(fake.count("git push origin master"), 1);
    }

    #[tokio::test]
    async fn test_conflicts_are_resolved_with_configured_policy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git/rebase-merge")).unwrap();
        let fake = FakeRunner::new(dir.path());
        fake.on("git rev-list --count master..origin/master", CommandOutput::ok("1\n"));
        fake.on("git rev-list --count origin/master..master", CommandOutput::ok("1\n"));
        fake.on("git rebase origin/master", CommandOutput::failed(1, "CONFLICT"));
        fake.on_seq(
            "git diff -z --name-only --diff-filter=U",
            vec![CommandOutput::ok("todo.md\0"), CommandOutput::ok("")],
        );
        let sync = synchronizer(
            &fake,
            SyncConfig {
                conflict_policy: ConflictPolicy::PreferRemote,
                ..config(dir.path())
            },
        );

        let report = sync.sync_once().await.unwrap();

        assert_eq!(report.conflicts_resolved, 1);
        assert!(!report.rebase_aborted);
        assert_eq!(fake.count("git merge-file -p --ours"), 1);
        assert_eq!(fake.count("git rebase --abort"), 0);
    }

    #[tokio::test]
    async fn test_rebase_that_never_started_is_reported_without_abort() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let fake = FakeRunner::new(dir.path());
        fake.on("git rev-list --count master..origin/master", CommandOutput::ok("1\n"));
        fake.on("git rev-list --count origin/master..master", CommandOutput::ok("1\n"));
        fake.on(
            "git rebase origin/master",
            CommandOutput::failed(1, "error: untracked working tree files would be overwritten"),
        );
        let sync = synchronizer(&fake, config(dir.path()));

        let err = sync.sync_once().await.unwrap_err();

        assert!(
            matches!(err, SyncError::RebaseNotStarted { ref upstream, ref output }
                if upstream == "origin/master" && output.contains("would be overwritten")),
            "{err:?}"
        );
        assert_eq!(fake.count("git diff -z --name-only --diff-filter=U"), 0);
        assert_eq!(fake.count("git rebase --abort"), 0);
        assert_eq!(fake.count("git push origin master"), 1);
    }

    #[tokio::test]
    async fn test_garbage_count_fails_the_cycle() {
        let fake = FakeRunner::new("/tmp/notes");
        fake.on("git rev-list", CommandOutput::ok("fatal\n"));
        let sync = synchronizer(&fake, config(Path::new("/tmp/notes")));

        let err = sync.sync_once().await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidCount { .. }));
    }

    #[tokio::test]
    async fn test_notify_finished_names_watch_dir() {
        let fake = FakeRunner::new("/tmp/notes");
        let recorded = Recorded::default();
        let mut sync = Synchronizer::new(
            config(Path::new("/tmp/notes")),
            fake.clone(),
            Box::new(recorded.clone()),
            ID,
        );

        sync.notify_finished().await;
        assert_eq!(
            *recorded.0.lock().unwrap(),
            vec!["finished sync of /tmp/notes".to_string()]
        );
    }
}
