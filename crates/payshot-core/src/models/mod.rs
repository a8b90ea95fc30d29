//! Data models for payment screenshot batches.

pub mod config;
pub mod image;
pub mod record;
pub mod report;

pub use config::PayshotConfig;
pub use image::{ContentHash, Fingerprint, ImageRef};
pub use record::{ExtractionRecord, ImageOutcome, OutcomeKind};
pub use report::BatchReport;
