//! Auto-download feature gate

use async_trait::async_trait;
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::db::{self, Database};
use crate::error::DbResult;

pub const AUTO_DOWNLOAD_KEY: &str = "auto_download_enabled";

/// Externally owned on/off switch, read on every watcher check.
#[async_trait]
pub trait FeatureGate: Send + Sync + 'static {
    async fn is_enabled(&self) -> DbResult<bool>;
}

/// Gate persisted in the `app_state` table. Off until explicitly enabled.
#[derive(Clone)]
pub struct AppStateGate {
    db: Arc<Database>,
}

impl AppStateGate {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn set_enabled(&self, enabled: bool) -> DbResult<()> {
        let conn = self.db.connection().await;
        db::set_app_state(&conn, AUTO_DOWNLOAD_KEY, if enabled { "1" } else { "0" }).await?;
        info!("auto_download: enabled={}", enabled);
        Ok(())
    }
}

#[async_trait]
impl FeatureGate for AppStateGate {
    async fn is_enabled(&self) -> DbResult<bool> {
        let conn = self.db.connection().await;
        let value = db::get_app_state(&conn, AUTO_DOWNLOAD_KEY).await?;
        Ok(matches!(value.as_deref(), Some("1") | Some("true")))
    }
}

/// In-memory gate for embedders that keep the preference elsewhere.
#[derive(Debug, Default)]
pub struct StaticGate {
    enabled: AtomicBool,
}

impl StaticGate {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

#[async_trait]
impl FeatureGate for StaticGate {
    async fn is_enabled(&self) -> DbResult<bool> {
        Ok(self.enabled.load(Ordering::SeqCst))
    }
}
