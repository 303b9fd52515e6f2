//! Routes for the migration status API.
//!
//! ## Structure
//! - `GET /healthz`: liveness
//! - `GET /readyz`: readiness (SQLite, local root, object store)
//! - `GET /stats`: migration statistics
//! - `GET /materials?status=..&limit=..`: records in one status
//! - `GET /materials/{id}`: migration state of one record
//! - `POST /materials/{id}/migrate`: run one attempt immediately
//! - `GET /materials/{id}/download`: file content from the object store or local disk

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        material_handlers::{
            download_material, get_material, get_stats, list_materials, migrate_material,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router; handlers share `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/stats", get(get_stats))
        .route("/materials", get(list_materials))
        .route("/materials/{id}", get(get_material))
        .route("/materials/{id}/migrate", post(migrate_material))
        .route("/materials/{id}/download", get(download_material))
}
