//! Notification sink that writes through `tracing`

use crate::ports::{Notification, NotificationLevel, NotificationSink};

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl TracingNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl NotificationSink for TracingNotifier {
    fn notify(&self, notification: Notification) {
        let Notification { title, message, level } = notification;
        match level {
            NotificationLevel::Info | NotificationLevel::Success => {
                tracing::info!(target: "dexpilot::notify", %title, "{}", message)
            }
            NotificationLevel::Warning => tracing::warn!(target: "dexpilot::notify", %title, "{}", message),
            NotificationLevel::Critical => tracing::error!(target: "dexpilot::notify", %title, "{}", message),
        }
    }
}
