//! Contract for the media downloader collaborator
//!
//! The downloader resolves a note link into files and transfers them. It is
//! blocking code: the orchestrator runs it on the blocking thread pool and
//! receives results through [`DownloadCallbacks`], which may be invoked from
//! any of the downloader's own threads.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloaderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("{0}")]
    Failed(String),
}

pub trait DownloadCallbacks: Send + Sync {
    /// A file finished and is stored at `path`.
    fn on_file_downloaded(&self, path: &str);
    /// A single file failed; the rest of the note may still succeed.
    fn on_file_error(&self, status: &str, url: &str);
    fn on_progress(&self, status: &str);
    fn on_progress_bytes(&self, downloaded: u64, total: u64);
    /// Only fired when the downloader was asked to stop on video notes.
    fn on_video_detected(&self);
}

pub trait Downloader: Send {
    /// Best-effort number of files in the note.
    fn estimate_file_count(&mut self, url: &str) -> Result<u32, DownloaderError>;

    fn set_stop_on_video(&mut self, stop: bool);

    /// Transfer every file of the note. Returns overall success.
    fn download(
        &mut self,
        url: &str,
        callbacks: &dyn DownloadCallbacks,
    ) -> Result<bool, DownloaderError>;
}

/// Builds a fresh downloader for each operation.
pub trait DownloaderFactory: Send + Sync + 'static {
    fn create(&self) -> Box<dyn Downloader>;
}

impl<F> DownloaderFactory for F
where
    F: Fn() -> Box<dyn Downloader> + Send + Sync + 'static,
{
    fn create(&self) -> Box<dyn Downloader> {
        self()
    }
}
