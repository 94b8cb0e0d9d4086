//! Background download orchestration
//!
//! Turns a dispatched note link into a tracked task:
//! - File count estimate and task creation through the task store
//! - One cancellable job per task running the blocking downloader
//! - Active job registry with cleanup on every exit path
//! - Terminal notification sent exactly once per task

pub mod commands;
pub mod downloader;
pub mod registry;
mod types;
mod worker;

pub use commands::Orchestrator;
pub use downloader::{DownloadCallbacks, Downloader, DownloaderError, DownloaderFactory};
pub use registry::{ActiveJobs, JobGuard, PendingUrls, UrlReservation};
