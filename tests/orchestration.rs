mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{factory, open_store, wait_for_task, Script};
use tokio::sync::mpsc::UnboundedReceiver;
use xhsdn::task::{REASON_CANCELLED, REASON_NO_FILES, REASON_PROCESS_ERROR};
use xhsdn::{ChannelNotifier, NoteType, Notification, Orchestrator, TaskStatus};

async fn orchestrator(
    dir: &tempfile::TempDir,
    scripts: Vec<(&str, Script)>,
) -> (Orchestrator, UnboundedReceiver<Notification>) {
    let store = open_store(&dir.path().join("tasks.db")).await;
    let (notifier, rx) = ChannelNotifier::new();
    (
        Orchestrator::new(store, factory(scripts), Arc::new(notifier)),
        rx,
    )
}

fn drain(rx: &mut UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

fn terminal_titles(notifications: &[Notification]) -> Vec<String> {
    notifications
        .iter()
        .filter_map(|n| match n {
            Notification::Terminal { title, .. } => Some(title.clone()),
            _ => None,
        })
        .collect()
}

async fn run(orchestrator: &Orchestrator, url: &str) -> i64 {
    orchestrator
        .start_download(url, Some("shared text"))
        .expect("dispatched")
        .await
        .expect("job joined")
        .expect("task created")
}

#[tokio::test]
async fn successful_download_completes_task() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = "https://xhslink.com/ok";
    let (orchestrator, mut rx) = orchestrator(&dir, vec![(url, Script::files(3, 3))]).await;

    let id = run(&orchestrator, url).await;
    let task = orchestrator.store().get_task(id).expect("task");

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.note_type, NoteType::Image);
    assert_eq!(task.title.as_deref(), Some("shared text"));
    assert_eq!((task.completed_files, task.failed_files, task.total_files), (3, 0, 3));
    assert_eq!(task.file_paths.len(), 3);
    assert_eq!(task.progress(), 1.0);
    assert!(task.error.is_none());
    assert!(orchestrator.active_task_ids().is_empty());

    let notifications = drain(&mut rx);
    assert_eq!(
        notifications.first(),
        Some(&Notification::Preparing {
            url: url.to_string()
        })
    );
    assert!(notifications.iter().any(|n| matches!(
        n,
        Notification::Progress { detail, .. } if detail == "3/3 files"
    )));
    assert_eq!(terminal_titles(&notifications), vec!["Download complete"]);
}

#[tokio::test]
async fn single_file_note_is_video_and_missing_estimate_is_unknown() {
    let dir = tempfile::tempdir().expect("tempdir");
    let video = "https://xhslink.com/video";
    let unknown = "https://xhslink.com/unknown";
    let (orchestrator, _rx) = orchestrator(
        &dir,
        vec![
            (video, Script::files(1, 1)),
            (
                unknown,
                Script::Files {
                    estimate: None,
                    files: 2,
                    failures: 0,
                    success: true,
                },
            ),
        ],
    )
    .await;

    let video_id = run(&orchestrator, video).await;
    let unknown_id = run(&orchestrator, unknown).await;

    let video_task = orchestrator.store().get_task(video_id).expect("task");
    assert_eq!(video_task.note_type, NoteType::Video);

    let unknown_task = orchestrator.store().get_task(unknown_id).expect("task");
    assert_eq!(unknown_task.note_type, NoteType::Unknown);
    assert_eq!(unknown_task.status, TaskStatus::Completed);
    // Reconciled from the observed count since the estimate was unavailable.
    assert_eq!(unknown_task.total_files, 2);
}

#[tokio::test]
async fn zero_files_fails_with_reason() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = "https://xhslink.com/empty";
    let (orchestrator, mut rx) = orchestrator(&dir, vec![(url, Script::files(2, 0))]).await;

    let id = run(&orchestrator, url).await;
    let task = orchestrator.store().get_task(id).expect("task");

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some(REASON_NO_FILES));
    assert_eq!(terminal_titles(&drain(&mut rx)), vec!["Download failed"]);
}

#[tokio::test]
async fn downloader_failure_is_process_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = "https://xhslink.com/bad";
    let script = Script::Files {
        estimate: Some(2),
        files: 0,
        failures: 0,
        success: false,
    };
    let (orchestrator, _rx) = orchestrator(&dir, vec![(url, script)]).await;

    let id = run(&orchestrator, url).await;
    let task = orchestrator.store().get_task(id).expect("task");
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some(REASON_PROCESS_ERROR));
}

#[tokio::test]
async fn downloader_faults_are_contained() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fault = "https://xhslink.com/fault";
    let panic = "https://xhslink.com/panic";
    let (orchestrator, mut rx) = orchestrator(
        &dir,
        vec![
            (fault, Script::Fault("connection reset".to_string())),
            (panic, Script::Panic("parser blew up")),
        ],
    )
    .await;

    let fault_id = run(&orchestrator, fault).await;
    let panic_id = run(&orchestrator, panic).await;

    let fault_task = orchestrator.store().get_task(fault_id).expect("task");
    assert_eq!(fault_task.status, TaskStatus::Failed);
    assert_eq!(fault_task.error.as_deref(), Some("connection reset"));

    let panic_task = orchestrator.store().get_task(panic_id).expect("task");
    assert_eq!(panic_task.status, TaskStatus::Failed);
    assert_eq!(panic_task.error.as_deref(), Some("parser blew up"));

    assert!(orchestrator.active_task_ids().is_empty());
    assert_eq!(terminal_titles(&drain(&mut rx)).len(), 2);
}

#[tokio::test]
async fn partial_failure_completes_with_failed_count() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = "https://xhslink.com/partial";
    let script = Script::Files {
        estimate: Some(2),
        files: 2,
        failures: 1,
        success: true,
    };
    let (orchestrator, mut rx) = orchestrator(&dir, vec![(url, script)]).await;

    let id = run(&orchestrator, url).await;
    let task = orchestrator.store().get_task(id).expect("task");

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!((task.completed_files, task.failed_files), (2, 1));
    assert_eq!(task.total_files, 3);
    assert!(task.completed_files + task.failed_files <= task.total_files);
    assert_eq!(
        terminal_titles(&drain(&mut rx)),
        vec!["Download finished with errors"]
    );
}

#[tokio::test]
async fn stop_task_cancels_running_job() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = "https://xhslink.com/slow";
    let release = Arc::new(AtomicBool::new(false));
    let (orchestrator, mut rx) =
        orchestrator(&dir, vec![(url, Script::Block(Arc::clone(&release)))]).await;

    let handle = orchestrator
        .start_download(url, None)
        .expect("dispatched");
    let store = Arc::clone(orchestrator.store());
    let first = common::wait_for_any_task(&store).await;
    let running = wait_for_task(&store, first.id, |t| t.completed_files == 1).await;
    assert_eq!(running.status, TaskStatus::Downloading);
    assert!(orchestrator.is_active(running.id));

    assert!(orchestrator.stop_task(running.id).await.expect("stop"));
    assert!(!orchestrator.is_active(running.id));

    let stopped = store.get_task(running.id).expect("task");
    assert_eq!(stopped.status, TaskStatus::Failed);
    assert_eq!(stopped.error.as_deref(), Some(REASON_CANCELLED));
    assert!(stopped.is_cancelled());

    // Second stop on a terminal task does nothing.
    assert!(!orchestrator.stop_task(running.id).await.expect("stop again"));

    assert_eq!(handle.await.expect("job joined"), Some(running.id));
    release.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Late callbacks from the detached transfer are ignored.
    let after = store.get_task(running.id).expect("task");
    assert_eq!(after.status, TaskStatus::Failed);
    assert_eq!(after.completed_files, 1);
    assert!(orchestrator.active_task_ids().is_empty());
    assert_eq!(
        terminal_titles(&drain(&mut rx)),
        vec!["Download cancelled"]
    );
}

#[tokio::test]
async fn stopping_one_task_leaves_others_running() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (stopped_url, kept_url) = ("https://xhslink.com/stop-me", "https://xhslink.com/keep-me");
    let stopped_flag = Arc::new(AtomicBool::new(false));
    let kept_flag = Arc::new(AtomicBool::new(false));
    let (orchestrator, mut rx) = orchestrator(
        &dir,
        vec![
            (stopped_url, Script::Block(Arc::clone(&stopped_flag))),
            (kept_url, Script::Block(Arc::clone(&kept_flag))),
        ],
    )
    .await;

    let stopped_job = orchestrator.start_download(stopped_url, None).expect("a");
    let kept_job = orchestrator.start_download(kept_url, None).expect("b");
    let store = Arc::clone(orchestrator.store());
    for _ in 0..400 {
        if store.list_tasks().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let id_of = |url: &str| {
        store
            .list_tasks()
            .into_iter()
            .find(|t| t.url == url)
            .map(|t| t.id)
            .expect("task for url")
    };
    let (stopped_id, kept_id) = (id_of(stopped_url), id_of(kept_url));
    wait_for_task(&store, stopped_id, |t| t.completed_files == 1).await;
    wait_for_task(&store, kept_id, |t| t.completed_files == 1).await;

    assert!(orchestrator.stop_task(stopped_id).await.expect("stop"));
    assert_eq!(orchestrator.active_task_ids(), vec![kept_id]);

    kept_flag.store(true, Ordering::SeqCst);
    assert_eq!(kept_job.await.expect("joined"), Some(kept_id));
    let kept = store.get_task(kept_id).expect("kept");
    assert_eq!(kept.status, TaskStatus::Completed);
    assert_eq!((kept.completed_files, kept.total_files), (2, 3));

    assert_eq!(stopped_job.await.expect("joined"), Some(stopped_id));
    let stopped = store.get_task(stopped_id).expect("stopped");
    assert_eq!(stopped.status, TaskStatus::Failed);
    assert_eq!(stopped.error.as_deref(), Some(REASON_CANCELLED));
    stopped_flag.store(true, Ordering::SeqCst);

    let mut titles = terminal_titles(&drain(&mut rx));
    titles.sort();
    assert_eq!(titles, vec!["Download cancelled", "Download complete"]);
}

#[tokio::test]
async fn stop_before_job_registers_still_cancels() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (orchestrator, mut rx) = orchestrator(&dir, vec![]).await;
    // A record whose job has not registered yet.
    let id = orchestrator
        .store()
        .create_task("https://xhslink.com/early-stop", None, NoteType::Image, 2)
        .await
        .expect("create");
    assert!(!orchestrator.is_active(id));

    assert!(orchestrator.stop_task(id).await.expect("stop"));
    let task = orchestrator.store().get_task(id).expect("task");
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some(REASON_CANCELLED));
    // The job would now find the record finished and never transfer.
    assert!(!orchestrator.store().start_task(id).await.expect("start"));

    assert!(!orchestrator.stop_task(id).await.expect("stop again"));
    assert_eq!(terminal_titles(&drain(&mut rx)), vec!["Download cancelled"]);
}

#[tokio::test]
async fn stop_unknown_task_is_noop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (orchestrator, mut rx) = orchestrator(&dir, vec![]).await;
    assert!(!orchestrator.stop_task(42).await.expect("stop"));
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn concurrent_starts_for_same_url_create_one_task() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = "https://xhslink.com/dup";
    let (orchestrator, _rx) = orchestrator(&dir, vec![(url, Script::files(2, 2))]).await;

    let first = orchestrator.start_download(url, None);
    let second = orchestrator.start_download(url, None);
    let third = orchestrator.start_download(&format!("{}/", url), None);
    assert!(first.is_some());
    assert!(second.is_none());
    assert!(third.is_none());

    first.expect("first").await.expect("joined");
    // Within the recency window the link is still a duplicate.
    assert!(orchestrator.start_download(url, None).is_none());
    assert_eq!(orchestrator.store().list_tasks().len(), 1);
}

#[tokio::test]
async fn retry_failed_task_allocates_new_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = "https://xhslink.com/retry";
    let (orchestrator, _rx) = orchestrator(&dir, vec![(url, Script::files(2, 0))]).await;

    let failed_id = run(&orchestrator, url).await;
    let retried_id = orchestrator
        .retry_task(failed_id)
        .expect("retry")
        .expect("dispatched")
        .await
        .expect("joined")
        .expect("created");

    assert_ne!(failed_id, retried_id);
    let tasks = orchestrator.store().list_tasks();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].id, retried_id);
    let old = orchestrator.store().get_task(failed_id).expect("history kept");
    assert_eq!(old.status, TaskStatus::Failed);
}

#[tokio::test]
async fn retry_rejects_non_failed_and_unknown_tasks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = "https://xhslink.com/fine";
    let (orchestrator, _rx) = orchestrator(&dir, vec![(url, Script::files(1, 1))]).await;

    let id = run(&orchestrator, url).await;
    assert!(orchestrator.retry_task(id).expect("retry").is_none());
    assert!(orchestrator.retry_task(999).is_err());
}

#[tokio::test]
async fn delete_stops_and_removes_task() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = "https://xhslink.com/delete";
    let release = Arc::new(AtomicBool::new(false));
    let (orchestrator, _rx) =
        orchestrator(&dir, vec![(url, Script::Block(Arc::clone(&release)))]).await;

    let handle = orchestrator.start_download(url, None).expect("dispatched");
    let store = Arc::clone(orchestrator.store());
    let task = common::wait_for_any_task(&store).await;
    wait_for_task(&store, task.id, |t| t.status == TaskStatus::Downloading).await;

    assert!(orchestrator.delete_task(task.id).await.expect("delete"));
    assert!(store.get_task(task.id).is_none());
    assert!(!orchestrator.is_active(task.id));

    handle.await.expect("joined");
    release.store(true, Ordering::SeqCst);
}

#[tokio::test]
async fn observed_tasks_respect_invariants() {
    let dir = tempfile::tempdir().expect("tempdir");
    let partial = "https://xhslink.com/p";
    let (orchestrator, _rx) = orchestrator(
        &dir,
        vec![
            (
                partial,
                Script::Files {
                    estimate: Some(1),
                    files: 3,
                    failures: 2,
                    success: true,
                },
            ),
            ("https://xhslink.com/q", Script::files(4, 4)),
        ],
    )
    .await;

    let violations = Arc::new(Mutex::new(Vec::<String>::new()));
    let mut view = orchestrator.store().all_tasks();
    let observer = {
        let violations = Arc::clone(&violations);
        tokio::spawn(async move {
            let mut last_rank: HashMap<i64, u8> = HashMap::new();
            while view.changed().await.is_ok() {
                let snapshot = view.borrow_and_update().clone();
                let mut found = violations.lock().expect("lock");
                for task in snapshot {
                    if task.completed_files + task.failed_files > task.total_files {
                        found.push(format!("counts exceed total on {}", task.id));
                    }
                    if !(0.0..=1.0).contains(&task.progress()) {
                        found.push(format!("progress out of range on {}", task.id));
                    }
                    let rank = match task.status {
                        TaskStatus::Queued => 0,
                        TaskStatus::Downloading => 1,
                        TaskStatus::Completed | TaskStatus::Failed => 2,
                    };
                    let previous = last_rank.insert(task.id, rank).unwrap_or(0);
                    if rank < previous {
                        found.push(format!("status regressed on {}", task.id));
                    }
                }
            }
        })
    };

    let a = orchestrator.start_download(partial, None).expect("a");
    let b = orchestrator
        .start_download("https://xhslink.com/q", None)
        .expect("b");
    let (a, b) = (a.await.expect("a"), b.await.expect("b"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    observer.abort();

    assert!(violations.lock().expect("lock").is_empty());
    let store = orchestrator.store();
    assert_eq!(
        store.get_task(a.expect("a id")).expect("a").status,
        TaskStatus::Completed
    );
    assert_eq!(
        store.get_task(b.expect("b id")).expect("b").status,
        TaskStatus::Completed
    );
}
