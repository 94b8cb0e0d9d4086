//! Task store for per-link download attempts
//!
//! - Durable records written through to SQLite
//! - Monotone status machine: queued -> downloading -> completed | failed
//! - Monotone progress counters with a regression guard
//! - Recency-windowed duplicate check on normalized URLs
//! - Live, most-recent-first view for the presentation layer

mod dedup;
mod store;
mod types;

pub use dedup::{normalize_url, DedupPolicy};
pub use store::TaskStore;
pub use types::{
    DownloadTask, NoteType, TaskOutcome, TaskStatus, REASON_CANCELLED, REASON_INTERRUPTED,
    REASON_NO_FILES, REASON_PROCESS_ERROR, REASON_UNKNOWN,
};
