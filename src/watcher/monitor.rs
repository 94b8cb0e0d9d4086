//! Clipboard watcher: turns text source signals into download dispatches

use log::{debug, info, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::gate::FeatureGate;
use super::links::{extract_first_url, is_xhs_link};
use super::signal::SignalChannel;
use super::state::WatcherState;
use super::{DownloadDispatcher, ForegroundQuery};

/// What a single signal led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    Disabled,
    Throttled,
    NoLink,
    Foreground,
    Duplicate,
    NotTargetSite,
    Dispatched(String),
}

pub struct ClipboardWatcher {
    gate: Arc<dyn FeatureGate>,
    source: Arc<dyn SignalChannel>,
    dispatcher: Arc<dyn DownloadDispatcher>,
    foreground: ForegroundQuery,
    throttle: Duration,
    poll_interval: Duration,
    state: Mutex<WatcherState>,
}

impl ClipboardWatcher {
    pub fn new(
        gate: Arc<dyn FeatureGate>,
        source: Arc<dyn SignalChannel>,
        dispatcher: Arc<dyn DownloadDispatcher>,
        foreground: ForegroundQuery,
        throttle: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            gate,
            source,
            dispatcher,
            foreground,
            throttle,
            poll_interval,
            state: Mutex::new(WatcherState::default()),
        }
    }

    async fn gate_open(&self) -> bool {
        match self.gate.is_enabled().await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!("watcher_gate_failed: error={}", e);
                false
            }
        }
    }

    /// Handle text observed by either signal path.
    pub async fn on_signal(&self, observed_text: &str) -> SignalOutcome {
        if !self.gate_open().await {
            return SignalOutcome::Disabled;
        }
        self.process(observed_text).await
    }

    /// Read the text source and handle its content. Returns None when the
    /// source is empty or failed to read.
    pub async fn check_now(&self) -> Option<SignalOutcome> {
        if !self.gate_open().await {
            return Some(SignalOutcome::Disabled);
        }

        let source = Arc::clone(&self.source);
        let text = match catch_unwind(AssertUnwindSafe(|| source.read_text())) {
            Ok(Ok(Some(text))) => text,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                warn!("watcher_read_failed: error={}", e);
                return None;
            }
            Err(_) => {
                warn!("watcher_read_failed: text source panicked");
                return None;
            }
        };
        Some(self.process(&text).await)
    }

    async fn process(&self, text: &str) -> SignalOutcome {
        // Both signal paths serialize here; dedup depends on it.
        let mut state = self.state.lock().await;

        let now = Instant::now();
        if state.is_throttled(now, self.throttle) {
            return SignalOutcome::Throttled;
        }
        state.last_check = Some(now);

        let Some(url) = extract_first_url(text) else {
            return SignalOutcome::NoLink;
        };

        let foreground = match catch_unwind(AssertUnwindSafe(|| (self.foreground)())) {
            Ok(foreground) => foreground,
            Err(_) => {
                // Unknown visibility: leave dispatching to the interactive
                // surface and keep the previous bookkeeping.
                warn!("watcher_foreground_failed: query panicked");
                return SignalOutcome::Foreground;
            }
        };
        if foreground != state.foreground {
            debug!("watcher_foreground: {}", foreground);
            state.foreground = foreground;
        }
        if foreground {
            state.last_observed_text = Some(text.to_string());
            return SignalOutcome::Foreground;
        }

        if state.is_duplicate(text, url) {
            return SignalOutcome::Duplicate;
        }
        state.last_observed_text = Some(text.to_string());

        if !is_xhs_link(url) {
            return SignalOutcome::NotTargetSite;
        }

        state.last_dispatched_url = Some(url.to_string());
        if self.dispatcher.dispatch(url, Some(text)) {
            info!("watcher_dispatch: {}", url);
            SignalOutcome::Dispatched(url.to_string())
        } else {
            SignalOutcome::Duplicate
        }
    }

    /// Start the timer and push-event loops. Both stop when the returned
    /// handle is shut down.
    pub fn spawn(self: &Arc<Self>) -> WatcherHandle {
        let token = CancellationToken::new();

        let poll = {
            let watcher = Arc::clone(self);
            let token = token.clone();
            tokio::spawn(async move { watcher.run_poll_loop(token).await })
        };

        let events = self.source.subscribe().map(|receiver| {
            let watcher = Arc::clone(self);
            let token = token.clone();
            tokio::spawn(async move { watcher.run_event_loop(receiver, token).await })
        });

        info!(
            "watcher_started: poll_ms={} push_events={}",
            self.poll_interval.as_millis(),
            events.is_some()
        );
        WatcherHandle {
            token,
            poll,
            events,
        }
    }

    /// One check on its own task, so a panic in a collaborator ends only
    /// this iteration and never the loop driving it.
    async fn guarded_check(self: &Arc<Self>, path: &str) {
        let watcher = Arc::clone(self);
        match tokio::spawn(async move { watcher.check_now().await }).await {
            Ok(Some(outcome)) => debug!("watcher_{}: {:?}", path, outcome),
            Ok(None) => {}
            Err(e) => warn!("watcher_{}_failed: error={}", path, e),
        }
    }

    async fn run_poll_loop(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.guarded_check("poll").await,
            }
        }
    }

    async fn run_event_loop(
        self: Arc<Self>,
        mut receiver: broadcast::Receiver<()>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = receiver.recv() => match event {
                    // A lagged receiver only lost duplicate wake-ups.
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        self.guarded_check("event").await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("watcher_event: source closed");
                        break;
                    }
                },
            }
        }
    }
}

/// Running watcher loops.
pub struct WatcherHandle {
    token: CancellationToken,
    poll: JoinHandle<()>,
    events: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Stop both loops and wait for them to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.poll.await {
            warn!("watcher_poll_join_failed: error={}", e);
        }
        if let Some(events) = self.events {
            if let Err(e) = events.await {
                warn!("watcher_event_join_failed: error={}", e);
            }
        }
        info!("watcher_stopped");
    }
}
