pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{chunk, seeded_bytes};
