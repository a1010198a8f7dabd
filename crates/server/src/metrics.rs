//! Prometheus metrics for the casebook server.
//!
//! The `/metrics` endpoint is unauthenticated so Prometheus can scrape it.
//! Metrics carry no project, attachment or owner identifiers, only aggregate
//! counts; still, keep the endpoint off public networks.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use casebook_service::{ReconcileStats, ServiceError};
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Sequence id allocation
pub static SEQUENCE_IDS_ALLOCATED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "casebook_sequence_ids_allocated_total",
            "Sequence ids allocated, by kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static SEQUENCE_ALLOCATION_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "casebook_sequence_allocation_failures_total",
            "Sequence id allocations that gave up, by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

// Uploads
pub static UPLOADS_INITIALIZED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "casebook_uploads_initialized_total",
        "Multipart uploads started",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "casebook_uploads_completed_total",
        "Multipart uploads completed and recorded",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_ABORTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("casebook_uploads_aborted_total", "Multipart uploads aborted")
        .expect("metric creation failed")
});

pub static UPLOAD_COMPLETE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "casebook_upload_complete_duration_seconds",
            "Time taken to complete a multipart upload",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .expect("metric creation failed")
});

pub static BLOB_BYTES_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "casebook_blob_bytes_received_total",
        "Bytes received on signed part upload URLs",
    )
    .expect("metric creation failed")
});

// Deletion
pub static ATTACHMENT_DELETE_STEPS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "casebook_attachment_delete_steps_total",
            "Two-phase delete steps that succeeded, by step",
        ),
        &["step"],
    )
    .expect("metric creation failed")
});

// Reconciler
pub static RECONCILE_RUNS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("casebook_reconcile_runs_total", "Reconcile passes run")
        .expect("metric creation failed")
});

pub static RECONCILE_ITEMS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "casebook_reconcile_items_total",
            "Items handled by the reconciler, by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

// Errors
pub static API_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("casebook_api_errors_total", "API error responses by code"),
        &["code"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests can build as many routers as they like.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(SEQUENCE_IDS_ALLOCATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SEQUENCE_ALLOCATION_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_INITIALIZED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_COMPLETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_ABORTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_COMPLETE_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BLOB_BYTES_RECEIVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ATTACHMENT_DELETE_STEPS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RECONCILE_RUNS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RECONCILE_ITEMS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(API_ERRORS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

pub fn record_api_error(code: &str) {
    API_ERRORS.with_label_values(&[code]).inc();
}

pub fn record_allocation_failure(err: &ServiceError) {
    let reason = match err {
        ServiceError::AllocationExhausted { timed_out: true, .. } => "timeout",
        ServiceError::AllocationExhausted { .. } => "exhausted",
        ServiceError::StorageFault(_) => "fault",
        _ => return,
    };
    SEQUENCE_ALLOCATION_FAILURES
        .with_label_values(&[reason])
        .inc();
}

pub fn record_reconcile(stats: &ReconcileStats) {
    RECONCILE_RUNS.inc();
    for (outcome, count) in [
        ("deletion_finished", stats.deletions_finished),
        ("deletion_reverted", stats.deletions_reverted),
        ("upload_expired", stats.uploads_expired),
        ("error", stats.errors),
    ] {
        RECONCILE_ITEMS.with_label_values(&[outcome]).inc_by(count);
    }
}
