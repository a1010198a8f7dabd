//! HTTP API server for casebook.
//!
//! This crate provides the HTTP surface over the service layer:
//! - Projects, test cases and defects with per-project sequence ids
//! - Multipart attachment uploads (initialize / complete / abort)
//! - Attachment download links, owner changes and two-phase deletion
//! - Signed blob endpoints for the filesystem backend
//! - Reconcile trigger and Prometheus metrics

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
