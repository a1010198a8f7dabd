//! Operator endpoints.

use crate::error::ApiResult;
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use casebook_service::ReconcileStats;

/// POST /v1/admin/reconcile - run one reconcile pass now.
///
/// Works whether or not the background reconciler is enabled.
pub async fn trigger_reconcile(
    State(state): State<AppState>,
) -> ApiResult<Json<ReconcileStats>> {
    let stats = state.services.reconciler.run_once().await?;
    metrics::record_reconcile(&stats);
    Ok(Json(stats))
}
