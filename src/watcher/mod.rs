//! Clipboard watcher module
//!
//! Watches an external text source on a timer and on push events, and
//! hands new note links to a [`DownloadDispatcher`].

mod gate;
mod links;
mod monitor;
mod signal;
mod state;

use std::sync::Arc;

pub use gate::{AppStateGate, FeatureGate, StaticGate, AUTO_DOWNLOAD_KEY};
pub use links::{extract_first_url, is_xhs_link};
pub use monitor::{ClipboardWatcher, SignalOutcome, WatcherHandle};
pub use signal::{MemoryClipboard, SignalChannel, SignalError};

/// Whether the interactive surface is visible. While it is, the watcher
/// leaves dispatching to it.
pub type ForegroundQuery = Arc<dyn Fn() -> bool + Send + Sync>;

/// Receiver of accepted links.
pub trait DownloadDispatcher: Send + Sync + 'static {
    /// Start a download for `url`. Returns false if it was not started,
    /// e.g. because the link was dispatched recently.
    fn dispatch(&self, url: &str, title: Option<&str>) -> bool;
}
