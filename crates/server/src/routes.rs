//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use casebook_storage::BLOB_ROUTE_PREFIX;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check (unauthenticated for load balancers/k8s probes)
        .route("/v1/health", get(handlers::health_check))
        // Projects and sequenced records
        .route(
            "/v1/projects",
            post(handlers::create_project).get(handlers::list_projects),
        )
        .route("/v1/projects/{project_id}", get(handlers::get_project))
        .route(
            "/v1/projects/{project_id}/testcases",
            post(handlers::create_test_case).get(handlers::list_test_cases),
        )
        .route(
            "/v1/testcases/{id}",
            get(handlers::get_test_case).delete(handlers::delete_test_case),
        )
        .route(
            "/v1/projects/{project_id}/defects",
            post(handlers::create_defect).get(handlers::list_defects),
        )
        .route(
            "/v1/defects/{id}",
            get(handlers::get_defect).delete(handlers::delete_defect),
        )
        // Upload control plane
        .route("/v1/attachments/upload", post(handlers::init_upload))
        .route(
            "/v1/attachments/upload/complete",
            post(handlers::complete_upload),
        )
        .route("/v1/attachments/upload/abort", post(handlers::abort_upload))
        // Attachments
        .route("/v1/attachments", get(handlers::list_attachments))
        .route(
            "/v1/attachments/{id}",
            get(handlers::get_attachment)
                .patch(handlers::link_attachment)
                .delete(handlers::delete_attachment),
        )
        // Admin
        .route("/v1/admin/reconcile", post(handlers::trigger_reconcile));

    // Part uploads are up to one chunk; the default 2 MiB body cap is too small.
    let part_limit = usize::try_from(state.config.attachments.chunk_size).unwrap_or(usize::MAX);
    let blob_routes = Router::new()
        .route(
            &format!("{BLOB_ROUTE_PREFIX}/{{*key}}"),
            put(handlers::put_blob_part)
                .get(handlers::get_blob)
                .delete(handlers::delete_blob),
        )
        .layer(DefaultBodyLimit::max(part_limit));

    let mut router = Router::new().merge(api_routes).merge(blob_routes);

    // When enabled, /metrics must be network-restricted to the scrapers.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
