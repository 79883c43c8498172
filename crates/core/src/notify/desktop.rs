//! Desktop notifications through libnotify's `notify-send`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::{ExecError, NotificationError};
use crate::exec::{command_line, CommandRunner};
use crate::notify::Event;

const APP_NAME: &str = "gitdrive";

/// Shows a desktop popup with the event as summary and the message as body.
pub struct DesktopNotifier {
    runner: Arc<dyn CommandRunner>,
}

impl DesktopNotifier {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Deliver one notification. A non-zero exit of `notify-send` is a
    /// delivery failure.
    pub async fn send(&self, event: &Event, message: &str) -> Result<(), NotificationError> {
        debug!(event = %event, "sending desktop notification");
        let args = vec![
            "-a".to_string(),
            APP_NAME.to_string(),
            event.to_string(),
            message.to_string(),
        ];
        let output = self.runner.execute("notify-send", &args).await?;
        if !output.success() {
            warn!(event = %event, code = ?output.code, "notify-send failed");
            return Err(NotificationError::Delivery(ExecError::CommandFailed {
                command: command_line("notify-send", &args),
                code: output.code,
                output: output.combined(),
            }));
        }
        Ok(())
    }
}
