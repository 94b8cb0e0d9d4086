use std::path::Path;
use tokio::sync::{Mutex, MutexGuard};
use turso::{Builder, Connection};

use crate::error::{DbResult, StoreError};

pub mod app_state;
pub mod tasks;

pub use app_state::{get_app_state, set_app_state};

/// Handle to the on-disk database.
///
/// The connection sits behind a mutex: turso's page cache is not safe for
/// concurrent statements on one connection, so every query takes the lock for
/// the duration of the statement only.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file and make sure all tables exist.
    pub async fn open(db_path: &Path) -> DbResult<Self> {
        let path = db_path
            .to_str()
            .ok_or_else(|| StoreError::InvalidPath(db_path.display().to_string()))?;
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;

        conn.execute_batch(&format!(
            "{}{}",
            tasks::get_table_sql(),
            app_state::get_table_sql()
        ))
        .await?;

        log::info!("db_open: {}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) async fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}
