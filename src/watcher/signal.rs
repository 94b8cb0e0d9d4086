//! External text source abstraction (clipboard or equivalent)

use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("text source unavailable: {0}")]
    Unavailable(String),

    #[error("text source read failed: {0}")]
    Read(String),
}

/// A text source that can be polled and may also push change events.
pub trait SignalChannel: Send + Sync + 'static {
    /// Current text, or None if the source holds no text.
    fn read_text(&self) -> Result<Option<String>, SignalError>;

    /// Change notifications. Sources without push support return None and
    /// are only polled.
    fn subscribe(&self) -> Option<broadcast::Receiver<()>>;
}

const EVENT_CAPACITY: usize = 16;

/// In-process text source. Every `set_text` pushes a change event.
#[derive(Debug)]
pub struct MemoryClipboard {
    text: Mutex<Option<String>>,
    changes: broadcast::Sender<()>,
}

impl Default for MemoryClipboard {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            text: Mutex::new(None),
            changes,
        }
    }
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_text(&self, text: impl Into<String>) {
        *self.text.lock().unwrap_or_else(PoisonError::into_inner) = Some(text.into());
        // No subscribers is fine; pollers still see the text.
        let _ = self.changes.send(());
    }

    pub fn clear(&self) {
        *self.text.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl SignalChannel for MemoryClipboard {
    fn read_text(&self) -> Result<Option<String>, SignalError> {
        Ok(self
            .text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<()>> {
        Some(self.changes.subscribe())
    }
}
