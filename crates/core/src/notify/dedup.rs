//! Suppression of repeated notifications.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::NotificationError;
use crate::notify::{Event, Notifier};

/// Wraps a notifier and drops any event that already fired within the
/// dedup window.
///
/// Only successful deliveries are recorded, so a failed delivery never
/// suppresses the next attempt.
pub struct DedupNotifier<N> {
    inner: N,
    window: Duration,
    fired: HashMap<Event, Instant>,
}

impl<N: Notifier> DedupNotifier<N> {
    pub fn new(inner: N, window: Duration) -> Self {
        Self {
            inner,
            window,
            fired: HashMap::new(),
        }
    }

    pub fn inner(&self) -> &N {
        &self.inner
    }

    /// When `event` last reached the wrapped notifier.
    pub fn last_fired(&self, event: &Event) -> Option<Instant> {
        self.fired.get(event).copied()
    }
}

#[async_trait]
impl<N: Notifier> Notifier for DedupNotifier<N> {
    async fn notify(&mut self, event: &Event, message: &str) -> Result<(), NotificationError> {
        if let Some(last) = self.fired.get(event) {
            let until = *last + self.window;
            if Instant::now() < until {
                debug!(
                    event = %event,
                    remaining_secs = (until - Instant::now()).as_secs(),
                    "notification dedup"
                );
                return Ok(());
            }
        }

        self.inner.notify(event, message).await?;
        self.fired.insert(event.clone(), Instant::now());
        Ok(())
    }
}
