//! Common test utilities and fixtures.

pub mod counters;
pub mod harness;

#[allow(unused_imports)]
pub use counters::*;
#[allow(unused_imports)]
pub use harness::*;
