#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use xhsdn::db::Database;
use xhsdn::{
    DedupPolicy, DownloadCallbacks, DownloadTask, Downloader, DownloaderError,
    DownloaderFactory, TaskStore,
};

/// What the fake downloader does for one URL.
#[derive(Clone)]
pub enum Script {
    Files {
        estimate: Option<u32>,
        files: u32,
        failures: u32,
        success: bool,
    },
    Fault(String),
    Panic(&'static str),
    /// Report one file, then block until the flag is raised.
    Block(Arc<AtomicBool>),
}

impl Script {
    pub fn files(estimate: u32, files: u32) -> Self {
        Script::Files {
            estimate: Some(estimate),
            files,
            failures: 0,
            success: true,
        }
    }
}

pub struct FakeDownloader {
    scripts: Arc<HashMap<String, Script>>,
    stop_on_video: bool,
}

impl FakeDownloader {
    fn script(&self, url: &str) -> Script {
        self.scripts
            .get(url)
            .cloned()
            .unwrap_or_else(|| Script::files(2, 2))
    }
}

impl Downloader for FakeDownloader {
    fn estimate_file_count(&mut self, url: &str) -> Result<u32, DownloaderError> {
        match self.script(url) {
            Script::Files {
                estimate: Some(n), ..
            } => Ok(n),
            Script::Files { estimate: None, .. } => {
                Err(DownloaderError::Network("estimate timed out".to_string()))
            }
            Script::Block(_) => Ok(3),
            Script::Fault(_) | Script::Panic(_) => Ok(1),
        }
    }

    fn set_stop_on_video(&mut self, stop: bool) {
        self.stop_on_video = stop;
    }

    fn download(
        &mut self,
        url: &str,
        callbacks: &dyn DownloadCallbacks,
    ) -> Result<bool, DownloaderError> {
        assert!(!self.stop_on_video, "background downloads never stop on video");
        callbacks.on_progress("resolving");
        match self.script(url) {
            Script::Files {
                files,
                failures,
                success,
                ..
            } => {
                for i in 0..files {
                    if i == 1 {
                        for _ in 0..failures {
                            callbacks.on_file_error("404", "https://cdn.example/missing");
                        }
                    }
                    callbacks.on_progress_bytes(u64::from(i + 1) * 100, 100 * u64::from(files));
                    callbacks.on_file_downloaded(&format!("/downloads/{}.jpg", i));
                }
                if files < 2 {
                    for _ in 0..failures {
                        callbacks.on_file_error("404", "https://cdn.example/missing");
                    }
                }
                Ok(success)
            }
            Script::Fault(message) => Err(DownloaderError::Failed(message)),
            Script::Panic(message) => panic!("{}", message),
            Script::Block(release) => {
                callbacks.on_file_downloaded("/downloads/first.jpg");
                while !release.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(5));
                }
                callbacks.on_file_downloaded("/downloads/late.jpg");
                Ok(true)
            }
        }
    }
}

pub fn factory(scripts: Vec<(&str, Script)>) -> Arc<dyn DownloaderFactory> {
    let scripts: Arc<HashMap<String, Script>> = Arc::new(
        scripts
            .into_iter()
            .map(|(url, script)| (url.to_string(), script))
            .collect(),
    );
    Arc::new(move || {
        Box::new(FakeDownloader {
            scripts: Arc::clone(&scripts),
            stop_on_video: true,
        }) as Box<dyn Downloader>
    })
}

pub async fn open_store(path: &Path) -> Arc<TaskStore> {
    let db = Arc::new(Database::open(path).await.expect("open db"));
    Arc::new(
        TaskStore::open(db, DedupPolicy::new(Duration::from_secs(60), 50))
            .await
            .expect("open store"),
    )
}

/// Poll until `check` holds for the task, or panic after a few seconds.
pub async fn wait_for_task<F>(store: &TaskStore, id: i64, check: F) -> DownloadTask
where
    F: Fn(&DownloadTask) -> bool,
{
    for _ in 0..400 {
        if let Some(task) = store.get_task(id) {
            if check(&task) {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached the expected state", id);
}

pub async fn wait_for_any_task(store: &TaskStore) -> DownloadTask {
    for _ in 0..400 {
        if let Some(task) = store.list_tasks().into_iter().next() {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no task was created");
}
