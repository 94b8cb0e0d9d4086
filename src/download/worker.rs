//! Download worker - one cancellable unit of work per task

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::notify::NotificationSink;
use crate::task::{
    NoteType, TaskOutcome, TaskStore, REASON_CANCELLED, REASON_NO_FILES, REASON_PROCESS_ERROR,
    REASON_UNKNOWN,
};

use super::downloader::{DownloadCallbacks, DownloaderFactory};
use super::registry::{ActiveJobs, PendingUrls, UrlReservation};
use super::types::{
    CallbackEvent, TransferExit, DETAIL_CANCELLED, TITLE_CANCELLED, TITLE_COMPLETE,
    TITLE_DOWNLOADING, TITLE_ERROR, TITLE_FAILED, TITLE_PARTIAL, TITLE_VIDEO_DETECTED,
};

/// Everything a download job needs, shared by all jobs.
pub(crate) struct DownloadContext {
    pub store: Arc<TaskStore>,
    pub factory: Arc<dyn DownloaderFactory>,
    pub notifier: Arc<dyn NotificationSink>,
    pub jobs: Arc<ActiveJobs>,
    pub pending: Arc<PendingUrls>,
}

#[derive(Debug, Default)]
struct FileCounters {
    completed: AtomicU32,
    failed: AtomicU32,
}

/// Highest counters the pump has applied. Callback snapshots taken on
/// different threads can arrive out of order; the store only ever sees the
/// running maximum.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ProgressMark {
    completed: u32,
    failed: u32,
}

impl ProgressMark {
    fn advance(&mut self, completed: u32, failed: u32) -> (u32, u32) {
        self.completed = self.completed.max(completed);
        self.failed = self.failed.max(failed);
        (self.completed, self.failed)
    }
}

/// Callback handler handed to the downloader. Safe to call from any thread;
/// every event is dropped once the task is cancelled.
struct TaskCallbacks {
    task_id: i64,
    events: mpsc::UnboundedSender<CallbackEvent>,
    token: CancellationToken,
    counters: Arc<FileCounters>,
}

impl TaskCallbacks {
    fn send(&self, event: CallbackEvent) {
        // The worker stops listening only after cancellation.
        let _ = self.events.send(event);
    }
}

impl DownloadCallbacks for TaskCallbacks {
    fn on_file_downloaded(&self, path: &str) {
        if self.token.is_cancelled() {
            return;
        }
        let completed = self.counters.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let failed = self.counters.failed.load(Ordering::SeqCst);
        self.send(CallbackEvent::FileDownloaded {
            path: path.to_string(),
            completed,
            failed,
        });
    }

    fn on_file_error(&self, status: &str, url: &str) {
        if self.token.is_cancelled() {
            return;
        }
        let failed = self.counters.failed.fetch_add(1, Ordering::SeqCst) + 1;
        let completed = self.counters.completed.load(Ordering::SeqCst);
        self.send(CallbackEvent::FileFailed {
            status: status.to_string(),
            url: url.to_string(),
            completed,
            failed,
        });
    }

    fn on_progress(&self, status: &str) {
        if !self.token.is_cancelled() {
            debug!("download_status: {} {}", self.task_id, status);
        }
    }

    fn on_progress_bytes(&self, downloaded: u64, total: u64) {
        if !self.token.is_cancelled() {
            debug!("download_bytes: {} {}/{}", self.task_id, downloaded, total);
        }
    }

    fn on_video_detected(&self) {
        if !self.token.is_cancelled() {
            self.send(CallbackEvent::VideoDetected);
        }
    }
}

/// Estimate on the blocking pool. Any failure, including a panic, counts as 0.
async fn estimate_file_count(ctx: &DownloadContext, url: &str) -> u32 {
    let factory = Arc::clone(&ctx.factory);
    let url_owned = url.to_string();
    let result = tokio::task::spawn_blocking(move || {
        let mut downloader = factory.create();
        downloader.estimate_file_count(&url_owned)
    })
    .await;

    match result {
        Ok(Ok(count)) => count,
        Ok(Err(e)) => {
            warn!("download_estimate_failed: {} error={}", url, e);
            0
        }
        Err(e) => {
            warn!("download_estimate_panicked: {} error={}", url, e);
            0
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        REASON_UNKNOWN.to_string()
    }
}

/// Full lifecycle of one dispatched link: estimate, create, run, finalize.
/// Returns the created task id, or None if no record could be created.
pub(crate) async fn run_download(
    ctx: Arc<DownloadContext>,
    url: String,
    title: Option<String>,
    reservation: UrlReservation,
) -> Option<i64> {
    ctx.notifier.notify_preparing(&url);

    let estimate = estimate_file_count(&ctx, &url).await;
    let note_type = NoteType::from_file_count(estimate);

    let task_id = match ctx
        .store
        .create_task(&url, title.as_deref(), note_type, estimate)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            error!("download_create_failed: {} error={}", url, e);
            ctx.notifier.notify_terminal(TITLE_FAILED, &e.to_string());
            return None;
        }
    };

    // Registered before anything else can observe the task; the guard
    // removes the entry however this function exits.
    let (token, _job) = ctx.jobs.register(task_id);
    // The record now answers duplicate checks for this URL.
    drop(reservation);

    let exit = match ctx.store.start_task(task_id).await {
        Ok(true) => {
            let detail = if estimate > 0 {
                format!("0/{} files", estimate)
            } else {
                "Resolving files".to_string()
            };
            ctx.notifier.notify_progress(TITLE_DOWNLOADING, &detail);
            transfer(&ctx, task_id, &url, &token).await
        }
        // Stopped before it got going.
        Ok(false) => TransferExit::Cancelled,
        Err(e) => TransferExit::Fault(e.to_string()),
    };

    finalize(&ctx, task_id, estimate, exit).await;
    Some(task_id)
}

async fn transfer(
    ctx: &DownloadContext,
    task_id: i64,
    url: &str,
    token: &CancellationToken,
) -> TransferExit {
    let (events, mut event_rx) = mpsc::unbounded_channel();
    let counters = Arc::new(FileCounters::default());
    let callbacks = TaskCallbacks {
        task_id,
        events,
        token: token.clone(),
        counters: Arc::clone(&counters),
    };

    let factory = Arc::clone(&ctx.factory);
    let url_owned = url.to_string();
    let blocking = tokio::task::spawn_blocking(move || {
        let mut downloader = factory.create();
        downloader.set_stop_on_video(false);
        // `callbacks` is dropped when this closure returns or unwinds, which
        // closes the event channel.
        downloader.download(&url_owned, &callbacks)
    });

    let pump = async {
        let mut mark = ProgressMark::default();
        while let Some(event) = event_rx.recv().await {
            apply_event(ctx, task_id, event, &mut mark, token).await;
        }
    };

    let run = async {
        let (result, ()) = tokio::join!(blocking, pump);
        result
    };

    tokio::select! {
        biased;
        _ = token.cancelled() => TransferExit::Cancelled,
        result = run => match result {
            Ok(Ok(success)) => TransferExit::Finished {
                success,
                completed: counters.completed.load(Ordering::SeqCst),
                failed: counters.failed.load(Ordering::SeqCst),
            },
            Ok(Err(e)) => TransferExit::Fault(e.to_string()),
            Err(e) => TransferExit::Fault(panic_message(e)),
        },
    }
}

async fn apply_event(
    ctx: &DownloadContext,
    task_id: i64,
    event: CallbackEvent,
    mark: &mut ProgressMark,
    token: &CancellationToken,
) {
    if token.is_cancelled() {
        return;
    }
    match event {
        CallbackEvent::FileDownloaded {
            path,
            completed,
            failed,
        } => {
            if let Err(e) = ctx.store.add_file_path(task_id, &path).await {
                warn!("download_file_path_failed: {} error={}", task_id, e);
            }
            let (completed, failed) = mark.advance(completed, failed);
            match ctx.store.update_progress(task_id, completed, failed).await {
                Ok(true) => {
                    let total = ctx
                        .store
                        .get_task(task_id)
                        .map(|task| task.total_files)
                        .unwrap_or(completed);
                    ctx.notifier.notify_progress(
                        TITLE_DOWNLOADING,
                        &format!("{}/{} files", completed, total),
                    );
                }
                Ok(false) => {}
                Err(e) => debug!("download_progress_skipped: {} error={}", task_id, e),
            }
        }
        CallbackEvent::FileFailed {
            status,
            url,
            completed,
            failed,
        } => {
            warn!(
                "download_file_failed: {} url={} status={}",
                task_id, url, status
            );
            let (completed, failed) = mark.advance(completed, failed);
            if let Err(e) = ctx.store.update_progress(task_id, completed, failed).await {
                debug!("download_progress_skipped: {} error={}", task_id, e);
            }
        }
        CallbackEvent::VideoDetected => {
            warn!("download_video_detected: {}", task_id);
            ctx.notifier.notify_diagnostic(
                TITLE_VIDEO_DETECTED,
                &format!("Task {} reported a video note", task_id),
            );
        }
    }
}

async fn finalize(ctx: &DownloadContext, task_id: i64, estimate: u32, exit: TransferExit) {
    let (outcome, title, detail) = match exit {
        TransferExit::Finished {
            success: true,
            completed,
            failed,
        } => {
            // Snapshots from concurrent callbacks can arrive out of order;
            // the final counters cover all of them.
            if let Err(e) = ctx.store.update_progress(task_id, completed, failed).await {
                debug!("download_progress_skipped: {} error={}", task_id, e);
            }
            let total = estimate.max(completed.saturating_add(failed));
            if let Err(e) = ctx.store.set_total_files(task_id, total).await {
                warn!("download_total_failed: {} error={}", task_id, e);
            }
            if completed > 0 && failed > 0 {
                (
                    TaskOutcome::Success,
                    TITLE_PARTIAL,
                    format!("{} of {} files downloaded, {} failed", completed, total, failed),
                )
            } else if completed > 0 {
                (
                    TaskOutcome::Success,
                    TITLE_COMPLETE,
                    format!("Downloaded {} files", completed),
                )
            } else {
                (
                    TaskOutcome::failure(REASON_NO_FILES),
                    TITLE_FAILED,
                    "No files were downloaded".to_string(),
                )
            }
        }
        TransferExit::Finished { success: false, .. } => (
            TaskOutcome::failure(REASON_PROCESS_ERROR),
            TITLE_FAILED,
            "Check the network or the link".to_string(),
        ),
        TransferExit::Fault(message) => {
            let outcome = TaskOutcome::failure(message);
            let detail = match &outcome {
                TaskOutcome::Failure(reason) => reason.clone(),
                TaskOutcome::Success => String::new(),
            };
            (outcome, TITLE_ERROR, detail)
        }
        TransferExit::Cancelled => (
            TaskOutcome::failure(REASON_CANCELLED),
            TITLE_CANCELLED,
            DETAIL_CANCELLED.to_string(),
        ),
    };

    match ctx.store.complete_task(task_id, outcome).await {
        Ok(true) => ctx.notifier.notify_terminal(title, &detail),
        Ok(false) => debug!("download_finalize_skipped: {} already finished", task_id),
        Err(StoreError::TaskNotFound(_)) => {
            debug!("download_finalize_skipped: {} deleted", task_id)
        }
        Err(e) => {
            // The in-memory record is terminal even when the write failed.
            error!("download_finalize_failed: {} error={}", task_id, e);
            ctx.notifier.notify_terminal(title, &detail);
        }
    }
    info!("download_job_exit: {}", task_id);
}
