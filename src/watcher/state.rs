use tokio::time::Instant;

/// Bookkeeping shared by the timer path and the event path.
#[derive(Debug, Default)]
pub(crate) struct WatcherState {
    pub last_observed_text: Option<String>,
    pub last_dispatched_url: Option<String>,
    /// Time of the last check that got past the throttle.
    pub last_check: Option<Instant>,
    pub foreground: bool,
}

impl WatcherState {
    /// True if a check at `now` falls inside the throttle window.
    pub fn is_throttled(&self, now: Instant, window: std::time::Duration) -> bool {
        match self.last_check {
            Some(last) => now.saturating_duration_since(last) < window,
            None => false,
        }
    }

    pub fn is_duplicate(&self, text: &str, url: &str) -> bool {
        let last_text = self.last_observed_text.as_deref();
        last_text == Some(text)
            || last_text == Some(url)
            || self.last_dispatched_url.as_deref() == Some(url)
    }
}
