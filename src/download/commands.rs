//! Download orchestrator commands

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::error::{DbResult, StoreError};
use crate::notify::NotificationSink;
use crate::task::{normalize_url, TaskOutcome, TaskStatus, TaskStore, REASON_CANCELLED};
use crate::watcher::DownloadDispatcher;

use super::downloader::DownloaderFactory;
use super::registry::{ActiveJobs, PendingUrls};
use super::types::{DETAIL_CANCELLED, TITLE_CANCELLED};
use super::worker::{run_download, DownloadContext};

/// Entry point for starting, stopping and deleting download tasks.
///
/// Cheap to clone; every clone drives the same registry and store.
#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<DownloadContext>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<TaskStore>,
        factory: Arc<dyn DownloaderFactory>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            ctx: Arc::new(DownloadContext {
                store,
                factory,
                notifier,
                jobs: Arc::new(ActiveJobs::default()),
                pending: Arc::new(PendingUrls::default()),
            }),
        }
    }

    /// Start a background download unless the URL was dispatched recently.
    ///
    /// Returns the handle of the spawned job, or None when the call was a
    /// duplicate. The handle resolves to the new task id. Must be called from
    /// within a tokio runtime.
    pub fn start_download(&self, url: &str, title: Option<&str>) -> Option<JoinHandle<Option<i64>>> {
        self.dispatch_job(url, title, true)
    }

    /// Dispatch a FAILED task's link again as a new task. The recency check
    /// is skipped since this is an explicit request.
    pub fn retry_task(&self, id: i64) -> DbResult<Option<JoinHandle<Option<i64>>>> {
        let task = self
            .ctx
            .store
            .get_task(id)
            .ok_or(StoreError::TaskNotFound(id))?;
        if task.status != TaskStatus::Failed {
            debug!("download_retry_skipped: {} status={}", id, task.status);
            return Ok(None);
        }
        info!("download_retry: {} url={}", id, task.url);
        Ok(self.dispatch_job(&task.url, task.title.as_deref(), false))
    }

    fn dispatch_job(
        &self,
        url: &str,
        title: Option<&str>,
        check_recent: bool,
    ) -> Option<JoinHandle<Option<i64>>> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }

        // Claimed synchronously so that a concurrent call for the same link
        // sees either the reservation or the created record.
        let reservation = match self.ctx.pending.try_reserve(&normalize_url(url)) {
            Some(reservation) => reservation,
            None => {
                debug!("download_duplicate_pending: {}", url);
                return None;
            }
        };
        if check_recent && self.ctx.store.has_recent_task(url) {
            debug!("download_duplicate_recent: {}", url);
            return None;
        }

        let ctx = Arc::clone(&self.ctx);
        let url = url.to_string();
        let title = title.map(str::to_string);
        Some(tokio::spawn(run_download(ctx, url, title, reservation)))
    }

    /// Cancel a running task and finalize it as user-cancelled.
    ///
    /// No-op (returns false) if the task has no active job and is already
    /// finished. A task whose job has not registered yet is stopped too.
    pub async fn stop_task(&self, id: i64) -> DbResult<bool> {
        if !self.ctx.jobs.cancel(id) {
            let unfinished = self
                .ctx
                .store
                .get_task(id)
                .is_some_and(|task| !task.is_terminal());
            if !unfinished {
                debug!("download_stop_skipped: {} not active", id);
                return Ok(false);
            }
            // Registration may have happened since the first look.
            self.ctx.jobs.cancel_or_defer(id);
        }
        info!("download_stop: {}", id);

        match self
            .ctx
            .store
            .complete_task(id, TaskOutcome::failure(REASON_CANCELLED))
            .await
        {
            Ok(true) => {
                self.ctx
                    .notifier
                    .notify_terminal(TITLE_CANCELLED, DETAIL_CANCELLED);
                Ok(true)
            }
            // The job finished on its own just before the signal landed.
            Ok(false) => {
                self.ctx.jobs.forget_deferred(id);
                Ok(false)
            }
            Err(StoreError::TaskNotFound(_)) => {
                self.ctx.jobs.forget_deferred(id);
                Err(StoreError::TaskNotFound(id))
            }
            Err(e) => {
                warn!("download_stop_persist_failed: {} error={}", id, e);
                self.ctx
                    .notifier
                    .notify_terminal(TITLE_CANCELLED, DETAIL_CANCELLED);
                Err(e)
            }
        }
    }

    /// Delete a task record, stopping its job first if one is running.
    pub async fn delete_task(&self, id: i64) -> DbResult<bool> {
        if let Err(e) = self.stop_task(id).await {
            warn!("download_delete_stop_failed: {} error={}", id, e);
        }
        self.ctx.store.delete_task(id).await
    }

    pub fn is_active(&self, id: i64) -> bool {
        self.ctx.jobs.contains(id)
    }

    pub fn active_task_ids(&self) -> Vec<i64> {
        self.ctx.jobs.active_ids()
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.ctx.store
    }
}

impl DownloadDispatcher for Orchestrator {
    fn dispatch(&self, url: &str, title: Option<&str>) -> bool {
        self.start_download(url, title).is_some()
    }
}
