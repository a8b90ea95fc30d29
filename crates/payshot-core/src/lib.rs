//! Core library for payment screenshot recognition and deduplication.
//!
//! This crate provides:
//! - A persistent fingerprint cache of extraction results
//! - Content hashing for byte-identical duplicate detection
//! - Order number and amount extraction from noisy recognized text
//! - A bounded-concurrency dispatcher with fast and deep recognition passes
//! - Order-based aggregation, reporting and deduplicated output

pub mod aggregate;
pub mod cache;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod hashing;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod task;

pub use aggregate::{Aggregation, OrderGroup, RankedOrder};
pub use cache::{CacheStats, FingerprintCache};
pub use dispatch::{DispatchObserver, Dispatcher, NoopObserver};
pub use error::{CacheError, OcrError, PayshotError, Result};
pub use extract::{ExtractedFields, PaymentParser};
pub use hashing::{ContentHashIndex, DuplicateGroup, HashPartition};
pub use models::{BatchReport, ExtractionRecord, ImageOutcome, ImageRef, OutcomeKind, PayshotConfig};
pub use ocr::{RecognitionMode, Recognizer, TesseractRecognizer};
pub use pipeline::{discover_images, BatchPipeline};
pub use task::{TaskId, TaskRegistry, TaskState, TaskStatus};
