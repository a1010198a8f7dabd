//! Health endpoint.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub metadata: &'static str,
    pub storage: &'static str,
    pub storage_backend: &'static str,
}

/// GET /v1/health
///
/// Unauthenticated, for load balancers and probes. Reports 503 when either
/// store is unreachable; the failure detail is logged, not returned.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let metadata = match state.metadata.health_check().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::error!(error = %e, "metadata store health check failed");
            "unavailable"
        }
    };
    let storage = match state.blobs.health_check().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::error!(error = %e, "blob store health check failed");
            "unavailable"
        }
    };

    let healthy = metadata == "ok" && storage == "ok";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            metadata,
            storage,
            storage_backend: state.blobs.backend_name(),
        }),
    )
}
