//! Active job registry and in-flight URL reservations

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct JobTable {
    active: HashMap<i64, CancellationToken>,
    /// Stop requests for tasks whose job has not registered yet.
    deferred: HashSet<i64>,
}

/// Cancellation handles for every task that still has a running job.
///
/// Uses std::sync::Mutex so that [`JobGuard`] can release its entry from
/// `Drop`.
#[derive(Debug, Default)]
pub struct ActiveJobs {
    jobs: Mutex<JobTable>,
}

impl ActiveJobs {
    /// Register a job. The entry lives until the returned guard is dropped or
    /// the job is cancelled through [`ActiveJobs::cancel`]. A job that was
    /// stopped before it registered gets an already-cancelled token.
    pub fn register(self: &Arc<Self>, task_id: i64) -> (CancellationToken, JobGuard) {
        let token = CancellationToken::new();
        {
            let mut table = lock(&self.jobs);
            if table.deferred.remove(&task_id) {
                token.cancel();
            } else {
                table.active.insert(task_id, token.clone());
            }
        }
        (
            token,
            JobGuard {
                jobs: Arc::clone(self),
                task_id,
            },
        )
    }

    /// Signal and remove the job's handle. Returns false if no job is active.
    pub fn cancel(&self, task_id: i64) -> bool {
        match lock(&self.jobs).active.remove(&task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel the job if it is active, otherwise hold the request for its
    /// upcoming registration.
    pub fn cancel_or_defer(&self, task_id: i64) {
        let mut table = lock(&self.jobs);
        match table.active.remove(&task_id) {
            Some(token) => token.cancel(),
            None => {
                table.deferred.insert(task_id);
            }
        }
    }

    /// Drop a held stop request that no job will claim.
    pub fn forget_deferred(&self, task_id: i64) {
        lock(&self.jobs).deferred.remove(&task_id);
    }

    pub fn contains(&self, task_id: i64) -> bool {
        lock(&self.jobs).active.contains_key(&task_id)
    }

    pub fn active_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = lock(&self.jobs).active.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, task_id: i64) {
        lock(&self.jobs).active.remove(&task_id);
    }
}

/// Removes the registry entry when the job exits, on every path.
#[derive(Debug)]
pub struct JobGuard {
    jobs: Arc<ActiveJobs>,
    task_id: i64,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.jobs.release(self.task_id);
    }
}

/// Normalized URLs that are being dispatched but have no task record yet.
#[derive(Debug, Default)]
pub struct PendingUrls {
    urls: Mutex<HashSet<String>>,
}

impl PendingUrls {
    /// Claim a URL. Returns None if another dispatch already holds it.
    pub fn try_reserve(self: &Arc<Self>, normalized_url: &str) -> Option<UrlReservation> {
        if !lock(&self.urls).insert(normalized_url.to_string()) {
            return None;
        }
        Some(UrlReservation {
            pending: Arc::clone(self),
            url: normalized_url.to_string(),
        })
    }

    #[cfg(test)]
    fn is_reserved(&self, normalized_url: &str) -> bool {
        lock(&self.urls).contains(normalized_url)
    }
}

#[derive(Debug)]
pub struct UrlReservation {
    pending: Arc<PendingUrls>,
    url: String,
}

impl Drop for UrlReservation {
    fn drop(&mut self) {
        lock(&self.pending.urls).remove(&self.url);
    }
}
