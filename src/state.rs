//! Shared state handed to every HTTP handler.

use crate::services::{
    local_files::LocalFiles, migration_service::MigrationService, object_store::ObjectStore,
    record_store::RecordStore,
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Used directly by the readiness check.
    pub db: Arc<SqlitePool>,
    pub records: Arc<dyn RecordStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub files: LocalFiles,
    /// Runs on-demand attempts; the same engine the batch scheduler drives.
    pub migrations: MigrationService,
}
