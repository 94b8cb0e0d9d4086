//! Background downloader for Xiaohongshu share links
//!
//! Watches a text source for note links, downloads them through a pluggable
//! downloader and keeps a durable, observable record of every attempt.

pub mod config;
pub mod db;
pub mod download;
pub mod error;
pub mod notify;
pub mod task;
pub mod watcher;

use log::{info, warn};
use std::sync::Arc;
use tokio::sync::watch;

pub use config::Config;
pub use download::{
    DownloadCallbacks, Downloader, DownloaderError, DownloaderFactory, Orchestrator,
};
pub use error::{DbResult, StoreError};
pub use notify::{ChannelNotifier, LogNotifier, Notification, NotificationSink};
pub use task::{DedupPolicy, DownloadTask, NoteType, TaskOutcome, TaskStatus, TaskStore};
pub use watcher::{
    AppStateGate, ClipboardWatcher, DownloadDispatcher, FeatureGate, ForegroundQuery,
    MemoryClipboard, SignalChannel, SignalOutcome, WatcherHandle,
};

use db::Database;

/// The assembled background download service.
pub struct AutoDownloadService {
    orchestrator: Orchestrator,
    gate: AppStateGate,
    watcher: Arc<ClipboardWatcher>,
    handle: WatcherHandle,
}

impl AutoDownloadService {
    /// Validate `config`, open the task store, finalize tasks left over from a
    /// previous run and start the watcher loops. Must be called from within a
    /// tokio runtime.
    pub async fn start(
        config: Config,
        factory: Arc<dyn DownloaderFactory>,
        notifier: Arc<dyn NotificationSink>,
        source: Arc<dyn SignalChannel>,
        foreground: ForegroundQuery,
    ) -> DbResult<Self> {
        config.validate()?;
        let db = Arc::new(Database::open(&config.database_path).await?);
        let store = Arc::new(
            TaskStore::open(
                Arc::clone(&db),
                DedupPolicy::new(config.dedup_window(), config.dedup_max_records),
            )
            .await?,
        );

        let interrupted = store.recover_interrupted().await?;
        if !interrupted.is_empty() {
            notifier.notify_diagnostic(
                "Downloads interrupted",
                &format!("{} unfinished tasks marked as failed", interrupted.len()),
            );
        }
        match store.prune_finished(config.finished_retention()).await {
            Ok(0) => {}
            Ok(removed) => info!("service_prune: removed={}", removed),
            Err(e) => warn!("service_prune_failed: error={}", e),
        }

        let orchestrator = Orchestrator::new(store, factory, notifier);
        let gate = AppStateGate::new(db);
        let watcher = Arc::new(ClipboardWatcher::new(
            Arc::new(gate.clone()),
            source,
            Arc::new(orchestrator.clone()),
            foreground,
            config.throttle(),
            config.poll_interval(),
        ));
        let handle = watcher.spawn();

        info!("service_started: db={}", config.database_path.display());
        Ok(Self {
            orchestrator,
            gate,
            watcher,
            handle,
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        self.orchestrator.store()
    }

    pub fn watcher(&self) -> &Arc<ClipboardWatcher> {
        &self.watcher
    }

    /// Live, most-recent-first view of every task.
    pub fn all_tasks(&self) -> watch::Receiver<Vec<DownloadTask>> {
        self.store().all_tasks()
    }

    pub async fn set_auto_download_enabled(&self, enabled: bool) -> DbResult<()> {
        self.gate.set_enabled(enabled).await
    }

    pub async fn auto_download_enabled(&self) -> DbResult<bool> {
        self.gate.is_enabled().await
    }

    /// Stop watching. Running downloads keep going until they finish or are
    /// stopped through the orchestrator.
    pub async fn shutdown(self) {
        self.handle.shutdown().await;
        info!("service_stopped");
    }
}
