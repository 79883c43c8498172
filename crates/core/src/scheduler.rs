//! Run loop: sync, notify, sleep, repeat.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::sync::Synchronizer;

impl Synchronizer {
    /// Run sync cycles until `shutdown` is cancelled, or a single cycle when
    /// the `once` option is set.
    ///
    /// A failed cycle is logged and never ends the loop. The "finished sync"
    /// notification goes out after every cycle, whatever its outcome.
    pub async fn run(&mut self, shutdown: &CancellationToken) {
        let interval = self.config().interval;
        info!(
            interval_secs = interval.as_secs(),
            once = self.config().once,
            "starting sync loop"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("shutdown requested, exiting sync loop");
                return;
            }

            match self.sync_once().await {
                Ok(report) if report.changed_anything() => {
                    info!(
                        committed = report.committed_files,
                        remote_commits = report.remote_commits,
                        conflicts = report.conflicts_resolved,
                        pushed = report.pushed,
                        "sync cycle completed with changes"
                    );
                }
                Ok(report) => {
                    info!(online = report.online, "sync cycle completed");
                }
                Err(e) => {
                    error!(error = %e, "sync failed");
                }
            }
            self.notify_finished().await;

            if self.config().once {
                return;
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested during sleep, exiting");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
