//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness, no I/O
//! - GET /readyz   -> one check per dependency the migration engine needs:
//!   SQLite, the local upload root and the object store

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, time::Duration};
use tokio::{fs, time::timeout};
use uuid::Uuid;

const READINESS_KEY: &str = "readyz-check";
/// Used when the engine itself runs without a network timeout.
const DEFAULT_OBJECT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CheckStatus {
    fn from_result(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self {
                ok: true,
                error: None,
            },
            Err(error) => Self {
                ok: false,
                error: Some(error),
            },
        }
    }
}

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// HTTP 200 when every check passes, 503 otherwise. The body lists each
/// check so an operator can see which dependency is down.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let checks = BTreeMap::from([
        ("sqlite", CheckStatus::from_result(check_sqlite(&state).await)),
        ("disk", CheckStatus::from_result(check_local_root(&state).await)),
        (
            "object_store",
            CheckStatus::from_result(check_object_store(&state).await),
        ),
    ]);

    let ready = checks.values().all(|c| c.ok);
    let status = if ready {
        StatusCode::OK
    } else {
        tracing::warn!("readiness check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" },
        checks,
    };
    (status, Json(body))
}

async fn check_sqlite(state: &AppState) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.db)
        .await
    {
        Ok(1) => Ok(()),
        Ok(v) => Err(format!("unexpected result: {}", v)),
        Err(e) => Err(format!("error: {}", e)),
    }
}

/// Write, read back and remove a scratch file under the upload root; the
/// engine needs the same access to back up and delete sources.
async fn check_local_root(state: &AppState) -> Result<(), String> {
    let scratch = state
        .files
        .root()
        .join(format!(".readyz-{}", Uuid::new_v4()));
    fs::write(&scratch, b"readyz")
        .await
        .map_err(|e| format!("could not write scratch file: {}", e))?;
    let read_back = fs::read(&scratch).await;
    let removed = fs::remove_file(&scratch).await;
    match read_back {
        Ok(bytes) if bytes == b"readyz" => {}
        Ok(_) => return Err("scratch file content mismatch".into()),
        Err(e) => return Err(format!("could not read scratch file: {}", e)),
    }
    removed.map_err(|e| format!("could not remove scratch file: {}", e))
}

/// HEAD of a key that normally does not exist: "absent" still proves the
/// store answered. Bounded by the engine's network timeout.
async fn check_object_store(state: &AppState) -> Result<(), String> {
    let limit = state
        .migrations
        .network_timeout()
        .unwrap_or(DEFAULT_OBJECT_STORE_TIMEOUT);
    match timeout(limit, state.objects.head(READINESS_KEY)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(format!("bucket `{}`: {}", state.objects.bucket(), e)),
        Err(_) => Err(format!(
            "bucket `{}`: timed out after {:?}",
            state.objects.bucket(),
            limit
        )),
    }
}
