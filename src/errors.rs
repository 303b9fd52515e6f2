use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::services::{
    local_files::LocalFileError, migration_service::MigrationError,
    object_store::ObjectStoreError, record_store::RecordStoreError,
};

/// Error returned by the status API.
///
/// `code` is a stable machine-readable tag; `message` is for humans and may
/// change.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
    }

    /// Unknown record id.
    pub fn material_not_found(id: i64) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "material_not_found",
            format!("material {} not found", id),
        )
    }

    /// Query parameter that names no migration status.
    pub fn invalid_status(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_status", msg)
    }

    /// The record exists but neither copy of its content can be found.
    pub fn content_missing(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "content_missing", msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, "request failed: {}", self.message);
        }
        let body = Json(json!({
            "error": self.message,
            "code": self.code,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<RecordStoreError> for AppError {
    fn from(err: RecordStoreError) -> Self {
        match err {
            RecordStoreError::NotFound(id) => AppError::material_not_found(id),
            RecordStoreError::Corrupt { .. } => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "corrupt_record", err.to_string())
            }
            RecordStoreError::Sqlx(_) => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "database", err.to_string())
            }
        }
    }
}

impl From<ObjectStoreError> for AppError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::NotFound { .. } => AppError::content_missing(err.to_string()),
            ObjectStoreError::InvalidKey(_) => {
                AppError::new(StatusCode::BAD_REQUEST, "invalid_key", err.to_string())
            }
            other => AppError::new(StatusCode::BAD_GATEWAY, "object_store", other.to_string()),
        }
    }
}

/// Only record-store failures escape an attempt; everything else is folded
/// into the record's status.
impl From<MigrationError> for AppError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::RecordStore(err) => err.into(),
            other => AppError::new(StatusCode::BAD_GATEWAY, "migration", other.to_string()),
        }
    }
}

impl From<LocalFileError> for AppError {
    fn from(err: LocalFileError) -> Self {
        match err {
            LocalFileError::EmptyPath => AppError::content_missing(err.to_string()),
            LocalFileError::Io { ref source, .. }
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                AppError::content_missing(err.to_string())
            }
            other => AppError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io, path::PathBuf};

    #[test]
    fn store_errors_map_to_status_codes() {
        assert_eq!(
            AppError::from(RecordStoreError::NotFound(7)).status,
            StatusCode::NOT_FOUND
        );
        let missing = AppError::from(ObjectStoreError::NotFound {
            bucket: "b".into(),
            key: "k".into(),
        });
        assert_eq!(missing.code, "content_missing");
        assert_eq!(
            AppError::from(ObjectStoreError::Request("503".into())).status,
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn attempt_errors_surface_the_record_store_cause() {
        let err = AppError::from(MigrationError::RecordStore(RecordStoreError::Sqlx(
            sqlx::Error::PoolTimedOut,
        )));
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code, "database");
    }

    #[test]
    fn vanished_local_file_is_not_found() {
        let err = LocalFileError::Io {
            op: "open",
            path: PathBuf::from("/gone"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(AppError::from(err).status, StatusCode::NOT_FOUND);

        let denied = LocalFileError::Io {
            op: "open",
            path: PathBuf::from("/secret"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(AppError::from(denied).status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
