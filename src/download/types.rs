//! Download worker event types and notification texts

pub(crate) const TITLE_DOWNLOADING: &str = "Downloading";
pub(crate) const TITLE_COMPLETE: &str = "Download complete";
pub(crate) const TITLE_PARTIAL: &str = "Download finished with errors";
pub(crate) const TITLE_FAILED: &str = "Download failed";
pub(crate) const TITLE_ERROR: &str = "Download error";
pub(crate) const TITLE_CANCELLED: &str = "Download cancelled";
pub(crate) const TITLE_VIDEO_DETECTED: &str = "Video detected";

pub(crate) const DETAIL_CANCELLED: &str = "Task stopped by user";

/// Callback traffic from the downloader's threads to the task's worker.
/// Counts are the callback-side counters at the time the event was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CallbackEvent {
    FileDownloaded {
        path: String,
        completed: u32,
        failed: u32,
    },
    FileFailed {
        status: String,
        url: String,
        completed: u32,
        failed: u32,
    },
    VideoDetected,
}

/// How a task's unit of work ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransferExit {
    Finished {
        success: bool,
        completed: u32,
        failed: u32,
    },
    Fault(String),
    Cancelled,
}
