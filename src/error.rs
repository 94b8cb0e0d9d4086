use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] turso::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database path is not valid UTF-8: {0}")]
    InvalidPath(String),

    #[error("unknown task id: {0}")]
    TaskNotFound(i64),

    #[error(
        "progress for task {id} would go backwards: completed {completed}->{new_completed}, failed {failed}->{new_failed}"
    )]
    ProgressRegression {
        id: i64,
        completed: u32,
        failed: u32,
        new_completed: u32,
        new_failed: u32,
    },

    #[error("config error: {0}")]
    Config(String),
}

pub type DbResult<T> = std::result::Result<T, StoreError>;
