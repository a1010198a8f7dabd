//! HTTP request handlers.

pub mod admin;
pub mod attachments;
pub mod blobs;
pub mod common;
pub mod entities;
pub mod health;
pub mod uploads;

pub use admin::*;
pub use attachments::*;
pub use blobs::*;
pub use entities::*;
pub use health::*;
pub use uploads::*;
