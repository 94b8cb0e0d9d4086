//! Task record types and status definitions

use serde::{Deserialize, Serialize};

/// Failure reason recorded when the user stops an active task.
pub const REASON_CANCELLED: &str = "user-cancelled";
/// Transfer succeeded but not a single file landed on disk.
pub const REASON_NO_FILES: &str = "no files downloaded";
/// The downloader reported overall failure.
pub const REASON_PROCESS_ERROR: &str = "download process error";
/// The task was still running when the previous process exited.
pub const REASON_INTERRUPTED: &str = "interrupted";
pub const REASON_UNKNOWN: &str = "unknown error";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "downloading")]
    Downloading,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Downloading => write!(f, "downloading"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "queued" => TaskStatus::Queued,
            "downloading" => TaskStatus::Downloading,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Queued,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NoteType {
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "unknown")]
    Unknown,
}

impl NoteType {
    /// Guess the note type from the estimated number of media files.
    /// Video notes carry exactly one file; image notes carry one or more
    /// pictures, so a single file is taken as a video.
    pub fn from_file_count(count: u32) -> Self {
        match count {
            0 => NoteType::Unknown,
            1 => NoteType::Video,
            _ => NoteType::Image,
        }
    }
}

impl std::fmt::Display for NoteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoteType::Image => write!(f, "image"),
            NoteType::Video => write!(f, "video"),
            NoteType::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<String> for NoteType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "image" => NoteType::Image,
            "video" => NoteType::Video,
            _ => NoteType::Unknown,
        }
    }
}

/// One attempt to download a note.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadTask {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub note_type: NoteType,
    pub status: TaskStatus,
    pub total_files: u32,
    pub completed_files: u32,
    pub failed_files: u32,
    /// Failure reason, set only for FAILED tasks.
    pub error: Option<String>,
    pub file_paths: Vec<String>,
    pub created_at: i64, // Unix ms
    pub updated_at: i64, // Unix ms
}

impl DownloadTask {
    /// Fraction of files completed, always within [0, 1].
    pub fn progress(&self) -> f32 {
        if self.total_files == 0 {
            return 0.0;
        }
        (self.completed_files as f32 / self.total_files as f32).clamp(0.0, 1.0)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == TaskStatus::Failed && self.error.as_deref() == Some(REASON_CANCELLED)
    }
}

/// How a task ends. A failure always carries a reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failure(String),
}

impl TaskOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if reason.trim().is_empty() {
            TaskOutcome::Failure(REASON_UNKNOWN.to_string())
        } else {
            TaskOutcome::Failure(reason)
        }
    }
}
