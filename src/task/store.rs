//! Task store - durable task records with per-record serialized mutation

use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};
use tokio::sync::{watch, Mutex};

use crate::db::{self, Database};
use crate::error::{DbResult, StoreError};

use super::dedup::{normalize_url, DedupPolicy};
use super::types::{DownloadTask, NoteType, TaskOutcome, TaskStatus, REASON_INTERRUPTED};

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Durable collection of download tasks.
///
/// Records are cached in memory and written through to the database. Every
/// mutation of a record runs under that record's own async lock, so two
/// writers never interleave on one task while unrelated tasks proceed
/// independently. Readers see the committed in-memory copy.
pub struct TaskStore {
    db: Arc<Database>,
    tasks: StdMutex<BTreeMap<i64, DownloadTask>>,
    record_locks: StdMutex<HashMap<i64, Arc<Mutex<()>>>>,
    dedup: DedupPolicy,
    view: watch::Sender<Vec<DownloadTask>>,
}

impl TaskStore {
    /// Load all persisted tasks.
    pub async fn open(db: Arc<Database>, dedup: DedupPolicy) -> DbResult<Self> {
        let loaded = {
            let conn = db.connection().await;
            db::tasks::load_tasks(&conn).await?
        };
        info!("task_store_open: {} tasks", loaded.len());

        let tasks = loaded.into_iter().map(|task| (task.id, task)).collect();
        let (view, _) = watch::channel(Vec::new());
        let store = Self {
            db,
            tasks: StdMutex::new(tasks),
            record_locks: StdMutex::new(HashMap::new()),
            dedup,
            view,
        };
        store.publish();
        Ok(store)
    }

    fn record_lock(&self, id: i64) -> Arc<Mutex<()>> {
        lock(&self.record_locks).entry(id).or_default().clone()
    }

    fn current(&self, id: i64) -> DbResult<DownloadTask> {
        let found = lock(&self.tasks).get(&id).cloned();
        found.ok_or_else(|| {
            // No lock entry outlives its record.
            lock(&self.record_locks).remove(&id);
            StoreError::TaskNotFound(id)
        })
    }

    async fn persist(&self, task: &DownloadTask) -> DbResult<()> {
        let conn = self.db.connection().await;
        db::tasks::update_task(&conn, task).await
    }

    fn commit(&self, task: DownloadTask) {
        let mut tasks = lock(&self.tasks);
        tasks.insert(task.id, task);
        self.publish_locked(&tasks);
    }

    fn publish(&self) {
        let tasks = lock(&self.tasks);
        self.publish_locked(&tasks);
    }

    /// Must be called with the `tasks` guard held, so snapshots are sent in
    /// the same order the map changed.
    fn publish_locked(&self, tasks: &BTreeMap<i64, DownloadTask>) {
        // Ids grow with creation time, so reverse id order is recency order.
        let snapshot: Vec<DownloadTask> = tasks.values().rev().cloned().collect();
        self.view.send_replace(snapshot);
    }

    /// Insert a QUEUED task and return its freshly allocated id.
    pub async fn create_task(
        &self,
        url: &str,
        title: Option<&str>,
        note_type: NoteType,
        total_files_estimate: u32,
    ) -> DbResult<i64> {
        let now = now_ms();
        let id = {
            let conn = self.db.connection().await;
            db::tasks::insert_task(&conn, url, title, note_type, total_files_estimate, now).await?
        };

        info!(
            "task_created: {} url={} type={} total={}",
            id, url, note_type, total_files_estimate
        );
        self.commit(DownloadTask {
            id,
            url: url.to_string(),
            title: title.map(|s| s.to_string()),
            note_type,
            status: TaskStatus::Queued,
            total_files: total_files_estimate,
            completed_files: 0,
            failed_files: 0,
            error: None,
            file_paths: Vec::new(),
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    /// QUEUED -> DOWNLOADING. Returns false (no-op) for any other status.
    pub async fn start_task(&self, id: i64) -> DbResult<bool> {
        let record = self.record_lock(id);
        let _guard = record.lock().await;

        let mut task = self.current(id)?;
        if task.status != TaskStatus::Queued {
            debug!("task_start_skipped: {} status={}", id, task.status);
            return Ok(false);
        }

        task.status = TaskStatus::Downloading;
        task.updated_at = now_ms();
        self.persist(&task).await?;
        info!("task_status: {} -> {}", id, task.status);
        self.commit(task);
        Ok(true)
    }

    /// Replace the completed/failed counters.
    ///
    /// Counters never go backwards: an update reporting fewer files than
    /// already recorded is rejected with `ProgressRegression`. Updates to a
    /// terminal task are ignored (`Ok(false)`). If the counts exceed the
    /// current total, the total is raised to match.
    pub async fn update_progress(&self, id: i64, completed: u32, failed: u32) -> DbResult<bool> {
        let record = self.record_lock(id);
        let _guard = record.lock().await;

        let mut task = self.current(id)?;
        if task.is_terminal() {
            debug!("task_progress_skipped: {} status={}", id, task.status);
            return Ok(false);
        }
        if completed < task.completed_files || failed < task.failed_files {
            warn!(
                "task_progress_rejected: {} completed {}->{} failed {}->{}",
                id, task.completed_files, completed, task.failed_files, failed
            );
            return Err(StoreError::ProgressRegression {
                id,
                completed: task.completed_files,
                failed: task.failed_files,
                new_completed: completed,
                new_failed: failed,
            });
        }
        if completed == task.completed_files && failed == task.failed_files {
            return Ok(true);
        }

        task.completed_files = completed;
        task.failed_files = failed;
        task.total_files = task.total_files.max(completed.saturating_add(failed));
        task.updated_at = now_ms();
        self.persist(&task).await?;
        debug!(
            "task_progress: {} {}/{} failed={}",
            id, task.completed_files, task.total_files, task.failed_files
        );
        self.commit(task);
        Ok(true)
    }

    /// Reconcile the total once the real file count is known. The total never
    /// drops below the files already accounted for.
    pub async fn set_total_files(&self, id: i64, total: u32) -> DbResult<bool> {
        let record = self.record_lock(id);
        let _guard = record.lock().await;

        let mut task = self.current(id)?;
        if task.is_terminal() {
            return Ok(false);
        }
        let total = total.max(task.completed_files.saturating_add(task.failed_files));
        if total == task.total_files {
            return Ok(true);
        }

        task.total_files = total;
        task.updated_at = now_ms();
        self.persist(&task).await?;
        debug!("task_total: {} total={}", id, total);
        self.commit(task);
        Ok(true)
    }

    /// Append a downloaded file. Ignored once the task is terminal.
    pub async fn add_file_path(&self, id: i64, path: &str) -> DbResult<bool> {
        let record = self.record_lock(id);
        let _guard = record.lock().await;

        let mut task = self.current(id)?;
        if task.is_terminal() {
            debug!("task_file_skipped: {} status={} path={}", id, task.status, path);
            return Ok(false);
        }

        task.file_paths.push(path.to_string());
        task.updated_at = now_ms();
        self.persist(&task).await?;
        self.commit(task);
        Ok(true)
    }

    /// Move a task to COMPLETED or FAILED.
    ///
    /// Idempotent: returns `Ok(false)` if the task is already terminal. If the
    /// write fails the in-memory record is still finalized, so the process
    /// never keeps a task running that no job backs; the error is returned.
    pub async fn complete_task(&self, id: i64, outcome: TaskOutcome) -> DbResult<bool> {
        let record = self.record_lock(id);
        let _guard = record.lock().await;

        let mut task = self.current(id)?;
        if task.is_terminal() {
            debug!("task_complete_skipped: {} already {}", id, task.status);
            return Ok(false);
        }

        match outcome {
            TaskOutcome::Success => {
                task.status = TaskStatus::Completed;
                task.error = None;
            }
            TaskOutcome::Failure(reason) => {
                task.status = TaskStatus::Failed;
                task.error = Some(reason);
            }
        }
        task.updated_at = now_ms();

        match task.error.as_ref() {
            Some(err) => warn!("task_status: {} -> {} error={}", id, task.status, err),
            None => info!("task_status: {} -> {}", id, task.status),
        }

        let written = self.persist(&task).await;
        self.commit(task);
        if let Err(e) = written {
            error!("task_complete_persist_failed: {} error={}", id, e);
            return Err(e);
        }
        Ok(true)
    }

    /// True if a task for this URL was created inside the dedup window.
    pub fn has_recent_task(&self, url: &str) -> bool {
        self.has_recent_task_at(url, now_ms())
    }

    fn has_recent_task_at(&self, url: &str, now: i64) -> bool {
        let normalized = normalize_url(url);
        let tasks = lock(&self.tasks);
        self.dedup.matches(tasks.values().rev(), &normalized, now)
    }

    /// Permanently remove a task record. Returns false if it did not exist.
    pub async fn delete_task(&self, id: i64) -> DbResult<bool> {
        let record = self.record_lock(id);
        let _guard = record.lock().await;

        if !lock(&self.tasks).contains_key(&id) {
            return Ok(false);
        }
        {
            let conn = self.db.connection().await;
            db::tasks::delete_task(&conn, id).await?;
        }
        lock(&self.tasks).remove(&id);
        lock(&self.record_locks).remove(&id);
        info!("task_deleted: {}", id);
        self.publish();
        Ok(true)
    }

    pub fn get_task(&self, id: i64) -> Option<DownloadTask> {
        lock(&self.tasks).get(&id).cloned()
    }

    /// Snapshot of all tasks, most recent first.
    pub fn list_tasks(&self) -> Vec<DownloadTask> {
        self.view.borrow().clone()
    }

    /// Live view of all tasks, most recent first. The receiver sees a new
    /// snapshot after every committed mutation.
    pub fn all_tasks(&self) -> watch::Receiver<Vec<DownloadTask>> {
        self.view.subscribe()
    }

    /// Fail every task left QUEUED or DOWNLOADING by a previous process.
    /// Only valid before any download job has been started.
    pub async fn recover_interrupted(&self) -> DbResult<Vec<i64>> {
        let stale: Vec<i64> = lock(&self.tasks)
            .values()
            .filter(|task| !task.is_terminal())
            .map(|task| task.id)
            .collect();

        let mut recovered = Vec::new();
        for id in stale {
            if self
                .complete_task(id, TaskOutcome::failure(REASON_INTERRUPTED))
                .await?
            {
                recovered.push(id);
            }
        }
        if !recovered.is_empty() {
            warn!("task_recover: {} interrupted tasks marked failed", recovered.len());
        }
        Ok(recovered)
    }

    /// Delete every finished (completed or failed) task.
    pub async fn clear_finished(&self) -> DbResult<usize> {
        self.delete_finished_where(|_| true).await
    }

    /// Delete finished tasks last updated more than `older_than` ago.
    pub async fn prune_finished(&self, older_than: chrono::Duration) -> DbResult<usize> {
        let cutoff = now_ms() - older_than.num_milliseconds();
        self.delete_finished_where(|task| task.updated_at < cutoff)
            .await
    }

    async fn delete_finished_where<F>(&self, should_delete: F) -> DbResult<usize>
    where
        F: Fn(&DownloadTask) -> bool,
    {
        let candidates: Vec<i64> = lock(&self.tasks)
            .values()
            .filter(|task| task.is_terminal() && should_delete(task))
            .map(|task| task.id)
            .collect();

        let mut deleted = 0;
        for id in candidates {
            let record = self.record_lock(id);
            let _guard = record.lock().await;
            // Re-check under the record lock.
            let still_finished = lock(&self.tasks)
                .get(&id)
                .map(|task| task.is_terminal())
                .unwrap_or(false);
            if !still_finished {
                continue;
            }
            {
                let conn = self.db.connection().await;
                db::tasks::delete_task(&conn, id).await?;
            }
            lock(&self.tasks).remove(&id);
            lock(&self.record_locks).remove(&id);
            deleted += 1;
        }

        if deleted > 0 {
            info!("task_cleanup: {} finished tasks removed", deleted);
            self.publish();
        }
        Ok(deleted)
    }
}
