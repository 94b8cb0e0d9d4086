//! Notification sinks for download status side effects

use log::{debug, info};
use serde::Serialize;
use tokio::sync::mpsc;

/// Receives status side effects. Return values are never consulted, so
/// implementations must not block.
pub trait NotificationSink: Send + Sync + 'static {
    fn notify_preparing(&self, url: &str);
    fn notify_progress(&self, title: &str, detail: &str);
    fn notify_terminal(&self, title: &str, detail: &str);
    fn notify_diagnostic(&self, title: &str, detail: &str);
}

/// Notification payload for channel consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Preparing { url: String },
    Progress { title: String, detail: String },
    Terminal { title: String, detail: String },
    Diagnostic { title: String, detail: String },
}

/// Writes every notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify_preparing(&self, url: &str) {
        info!("notify_preparing: {}", url);
    }

    fn notify_progress(&self, title: &str, detail: &str) {
        debug!("notify_progress: {} - {}", title, detail);
    }

    fn notify_terminal(&self, title: &str, detail: &str) {
        info!("notify_terminal: {} - {}", title, detail);
    }

    fn notify_diagnostic(&self, title: &str, detail: &str) {
        info!("notify_diagnostic: {} - {}", title, detail);
    }
}

/// Forwards notifications to a channel, e.g. for a UI or a platform
/// notification bridge running on its own task.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn emit(&self, notification: Notification) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.sender.send(notification);
    }
}

impl NotificationSink for ChannelNotifier {
    fn notify_preparing(&self, url: &str) {
        self.emit(Notification::Preparing {
            url: url.to_string(),
        });
    }

    fn notify_progress(&self, title: &str, detail: &str) {
        self.emit(Notification::Progress {
            title: title.to_string(),
            detail: detail.to_string(),
        });
    }

    fn notify_terminal(&self, title: &str, detail: &str) {
        self.emit(Notification::Terminal {
            title: title.to_string(),
            detail: detail.to_string(),
        });
    }

    fn notify_diagnostic(&self, title: &str, detail: &str) {
        self.emit(Notification::Diagnostic {
            title: title.to_string(),
            detail: detail.to_string(),
        });
    }
}
