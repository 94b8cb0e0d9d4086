use turso::Connection;

use crate::error::DbResult;
use crate::task::{DownloadTask, NoteType, TaskStatus};

/// Get SQL for creating download task tables
pub fn get_table_sql() -> &'static str {
    "
    -- Download tasks table
    CREATE TABLE IF NOT EXISTS download_tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT NOT NULL,
        title TEXT,
        note_type TEXT NOT NULL DEFAULT 'unknown',
        status TEXT NOT NULL DEFAULT 'queued',
        total_files INTEGER NOT NULL DEFAULT 0,
        completed_files INTEGER NOT NULL DEFAULT 0,
        failed_files INTEGER NOT NULL DEFAULT 0,
        error TEXT,
        file_paths TEXT NOT NULL DEFAULT '[]',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_download_tasks_status ON download_tasks(status);
    CREATE INDEX IF NOT EXISTS idx_download_tasks_created ON download_tasks(created_at);
    "
}

const TASK_COLUMNS: &str = "id, url, title, note_type, status, total_files, completed_files,
    failed_files, error, file_paths, created_at, updated_at";

fn count_from_db(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn task_from_row(row: &turso::Row) -> DbResult<DownloadTask> {
    let note_type: String = row.get(3)?;
    let status: String = row.get(4)?;
    let total_files: i64 = row.get(5)?;
    let completed_files: i64 = row.get(6)?;
    let failed_files: i64 = row.get(7)?;
    let file_paths: String = row.get(9)?;

    Ok(DownloadTask {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        note_type: NoteType::from(note_type),
        status: TaskStatus::from(status),
        total_files: count_from_db(total_files),
        completed_files: count_from_db(completed_files),
        failed_files: count_from_db(failed_files),
        error: row.get(8)?,
        file_paths: serde_json::from_str(&file_paths)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

/// Insert a new QUEUED task and return its id
pub async fn insert_task(
    conn: &Connection,
    url: &str,
    title: Option<&str>,
    note_type: NoteType,
    total_files: u32,
    created_at: i64,
) -> DbResult<i64> {
    conn.execute(
        "INSERT INTO download_tasks
         (url, title, note_type, status, total_files, completed_files, failed_files,
          error, file_paths, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, NULL, '[]', ?6, ?7)",
        turso::params![
            url,
            title,
            note_type.to_string(),
            TaskStatus::Queued.to_string(),
            total_files as i64,
            created_at,
            created_at,
        ],
    )
    .await?;
    Ok(conn.last_insert_rowid())
}

/// Write every mutable column of a task
pub async fn update_task(conn: &Connection, task: &DownloadTask) -> DbResult<()> {
    let file_paths = serde_json::to_string(&task.file_paths)?;
    conn.execute(
        "UPDATE download_tasks
         SET status = ?1, total_files = ?2, completed_files = ?3, failed_files = ?4,
             error = ?5, file_paths = ?6, updated_at = ?7
         WHERE id = ?8",
        turso::params![
            task.status.to_string(),
            task.total_files as i64,
            task.completed_files as i64,
            task.failed_files as i64,
            task.error.clone(),
            file_paths,
            task.updated_at,
            task.id,
        ],
    )
    .await?;
    Ok(())
}

/// Load every task, most recent first
pub async fn load_tasks(conn: &Connection) -> DbResult<Vec<DownloadTask>> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {} FROM download_tasks ORDER BY created_at DESC, id DESC",
                TASK_COLUMNS
            ),
            (),
        )
        .await?;

    let mut tasks = Vec::new();
    while let Some(row) = rows.next().await? {
        match task_from_row(&row) {
            Ok(task) => tasks.push(task),
            Err(e) => log::warn!("task_load: skipping malformed row: {}", e),
        }
    }
    Ok(tasks)
}

/// Delete a task
pub async fn delete_task(conn: &Connection, id: i64) -> DbResult<()> {
    conn.execute(
        "DELETE FROM download_tasks WHERE id = ?1",
        turso::params![id],
    )
    .await?;
    Ok(())
}
