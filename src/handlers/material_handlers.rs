//! HTTP handlers for migration status and material downloads.
//! Downloads are served from the object store once a record is completed and
//! from local disk before that.

use crate::{
    errors::AppError,
    models::{MigrationRecord, MigrationStats, MigrationStatus},
    services::{migration_service::AttemptReport, remote_key::content_type_for, stats},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    status: Option<String>,
    limit: Option<u32>,
}

#[derive(Serialize)]
pub struct MigrateResponse {
    #[serde(flatten)]
    report: AttemptReport,
    record: MigrationRecord,
}

/// `GET /stats`: aggregate counts per status plus completion/failure rates.
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<MigrationStats>, AppError> {
    let stats = stats::collect(state.records.as_ref()).await?;
    Ok(Json(stats))
}

/// `GET /materials?status=FAILED&limit=20`
///
/// Failures come newest attempt first and completions newest upload first;
/// `limit` defaults to 50 and is capped at 500.
pub async fn list_materials(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<MigrationRecord>>, AppError> {
    let raw = params
        .status
        .ok_or_else(|| AppError::invalid_status("`status` query parameter is required"))?;
    let status = raw
        .to_ascii_uppercase()
        .parse::<MigrationStatus>()
        .map_err(|e| AppError::invalid_status(e.to_string()))?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let records = state.records.find_by_status(status, limit).await?;
    Ok(Json(records))
}

/// `POST /materials/{id}/migrate`: run one attempt now and report what it did.
pub async fn migrate_material(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MigrateResponse>, AppError> {
    let mut record = find_record(&state, id).await?;
    info!(record_id = id, status = record.status.as_str(), "manual migration requested");
    let report = state.migrations.attempt(&mut record).await?;
    Ok(Json(MigrateResponse { report, record }))
}

/// `GET /materials/{id}`: migration state of one record.
pub async fn get_material(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MigrationRecord>, AppError> {
    let record = find_record(&state, id).await?;
    Ok(Json(record))
}

/// `GET /materials/{id}/download`: file content, wherever it currently lives.
pub async fn download_material(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let record = find_record(&state, id).await?;

    let mut response = match (&record.status, record.remote_key.as_deref()) {
        (MigrationStatus::Completed, Some(key)) => {
            info!(record_id = id, remote_key = key, "serving material from object store");
            let bytes = state.objects.get(key).await?;
            let len = bytes.len() as u64;
            let mut response = Response::new(Body::from(bytes));
            set_length(response.headers_mut(), len);
            response
        }
        _ => {
            let path = state.files.resolve(&record.local_path)?;
            debug!(record_id = id, path = %path.display(), "serving material from local disk");
            let (file, len) = state.files.open(&path).await?;
            let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
            set_length(response.headers_mut(), len);
            response
        }
    };

    *response.status_mut() = StatusCode::OK;
    set_material_headers(response.headers_mut(), &record);
    Ok(response)
}

async fn find_record(state: &AppState, id: i64) -> Result<MigrationRecord, AppError> {
    state
        .records
        .get(id)
        .await?
        .ok_or_else(|| AppError::material_not_found(id))
}

fn set_length(headers: &mut HeaderMap, len: u64) {
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
}

fn set_material_headers(headers: &mut HeaderMap, record: &MigrationRecord) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&record.original_file_name)),
    );

    let disposition = format!(
        "attachment; filename=\"{}\"",
        record.original_file_name.replace(['"', '\\'], "_")
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    if let Some(hash) = record.content_hash.as_deref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", hash)) {
            headers.insert(header::ETAG, value);
        }
        if let Some(raw) = decode_hex(hash) {
            if let Ok(value) = HeaderValue::from_str(&general_purpose::STANDARD.encode(raw)) {
                headers.insert(HeaderName::from_static("content-md5"), value);
            }
        }
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}
