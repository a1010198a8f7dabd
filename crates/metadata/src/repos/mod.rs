//! Repository traits for metadata operations.

pub mod attachments;
pub mod defects;
pub mod projects;
pub mod sequences;
pub mod test_cases;
pub mod uploads;

pub use attachments::AttachmentRepo;
pub use defects::DefectRepo;
pub use projects::ProjectRepo;
pub use sequences::{CounterStore, DefectSequences, TestCaseSequences};
pub use test_cases::TestCaseRepo;
pub use uploads::UploadRepo;
