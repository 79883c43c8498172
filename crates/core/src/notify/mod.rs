//! User notifications.
//!
//! A [`Sink`] delivers messages (desktop popup or nothing at all) and a
//! [`DedupNotifier`] wraps any notifier to suppress repeats of the same
//! [`Event`] within a time window.

pub mod dedup;
pub mod desktop;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::errors::NotificationError;
use crate::exec::CommandRunner;

pub use dedup::DedupNotifier;
pub use desktop::DesktopNotifier;

/// Label identifying a class of notification; the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event(String);

impl Event {
    /// Emitted after every sync cycle, successful or not.
    pub const SYNC: &'static str = "sync";

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn sync() -> Self {
        Self::new(Self::SYNC)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Something that can show a message for an event to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&mut self, event: &Event, message: &str) -> Result<(), NotificationError>;
}

/// The delivery channels gitdrive supports.
pub enum Sink {
    /// Drop every notification.
    NoOp,
    /// Desktop popup via `notify-send`.
    Desktop(DesktopNotifier),
}

#[async_trait]
impl Notifier for Sink {
    async fn notify(&mut self, event: &Event, message: &str) -> Result<(), NotificationError> {
        match self {
            Self::NoOp => Ok(()),
            Self::Desktop(desktop) => desktop.send(event, message).await,
        }
    }
}

/// Build the notifier chain: a dedup window in front of the desktop sink,
/// or in front of a no-op sink when notifications are disabled.
pub fn build_notifier(
    enabled: bool,
    dedup_window: Duration,
    runner: Arc<dyn CommandRunner>,
) -> DedupNotifier<Sink> {
    let sink = if enabled {
        info!("desktop notifications enabled");
        Sink::Desktop(DesktopNotifier::new(runner))
    } else {
        Sink::NoOp
    };
    DedupNotifier::new(sink, dedup_window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::test_support::FakeRunner;

    #[tokio::test]
    async fn test_noop_always_succeeds() {
        let mut sink = Sink::NoOp;
        sink.notify(&Event::sync(), "finished sync").await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_chain_runs_nothing() {
        let fake = FakeRunner::new("/tmp");
        let mut notifier = build_notifier(false, Duration::from_secs(60), fake.clone());

        notifier.notify(&Event::sync(), "finished sync").await.unwrap();
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_enabled_chain_delivers_once_per_window() {
        let fake = FakeRunner::new("/tmp");
        fake.on("notify-send", CommandOutput::ok(""));
        let mut notifier = build_notifier(true, Duration::from_secs(60), fake.clone());

        notifier.notify(&Event::sync(), "finished sync").await.unwrap();
        notifier.notify(&Event::sync(), "finished sync").await.unwrap();
        assert_eq!(fake.count("notify-send"), 1);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(Event::sync().to_string(), "sync");
        assert_eq!(Event::new("push-failed").as_str(), "push-failed");
    }
}
