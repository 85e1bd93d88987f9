//! Liveness and readiness endpoints.
//!
//! - GET /healthz  -> always 200 while the process is serving
//! - GET /readyz   -> 200 only when the upload root accepts writes

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// `GET /healthz` — no I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Reports the `disk` check from `StorageService::check_writable`;
/// HTTP 503 when it fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let disk = match state.storage.check_writable().await {
        Ok(()) => CheckStatus {
            ok: true,
            error: None,
        },
        Err(err) => {
            warn!("upload root is not writable: {}", err);
            CheckStatus {
                ok: false,
                error: Some(err.to_string()),
            }
        }
    };

    let (status, label) = if disk.ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "error")
    };
    let checks = HashMap::from([("disk", disk)]);
    let body = ReadyResponse {
        status: label.into(),
        checks,
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
