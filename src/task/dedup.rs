//! Recency window used to suppress duplicate task creation

use std::time::Duration;
use url::Url;

use super::types::DownloadTask;

/// Canonical form of a link for duplicate detection.
///
/// Scheme and host are lowercased by the parser, the fragment is dropped and a
/// trailing slash on the path is ignored. Text that does not parse as a URL is
/// only trimmed.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_fragment(None);
            let normalized = url.to_string();
            match normalized.strip_suffix('/') {
                Some(stripped) if url.query().is_none() => stripped.to_string(),
                _ => normalized,
            }
        }
        Err(_) => trimmed.to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DedupPolicy {
    pub window: Duration,
    /// Only this many of the most recent tasks are considered.
    pub max_records: usize,
}

impl DedupPolicy {
    pub fn new(window: Duration, max_records: usize) -> Self {
        Self {
            window,
            max_records,
        }
    }

    /// `recent_first` must yield tasks in descending creation order.
    pub fn matches<'a>(
        &self,
        recent_first: impl Iterator<Item = &'a DownloadTask>,
        normalized_url: &str,
        now_ms: i64,
    ) -> bool {
        let window_ms = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms.saturating_sub(window_ms);
        recent_first
            .take(self.max_records)
            .take_while(|task| task.created_at > cutoff)
            .any(|task| normalize_url(&task.url) == normalized_url)
    }
}
