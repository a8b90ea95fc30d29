//! Batch report written to `report.json`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Aggregate result of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Images discovered under the batch root.
    pub total_files: usize,

    /// Canonical images with both fields, cached or freshly recognized.
    pub success_count: usize,

    /// Canonical images that failed extraction or errored.
    pub failed_count: usize,

    /// Successes served from the fingerprint cache.
    pub cached_count: usize,

    /// Successes recognized in this run.
    pub recognized_count: usize,

    /// Images excluded because they could not be hashed.
    pub hash_failure_count: usize,

    /// Distinct order identifiers.
    pub unique_orders: usize,

    /// Order identifiers seen on more than one image.
    pub duplicate_orders: usize,

    /// Groups of byte-identical images.
    pub duplicate_images: usize,

    /// Images across all byte-identical groups.
    pub total_duplicate_files: usize,

    /// Sum of canonical order amounts, two decimal places.
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,

    /// Canonical orders ranked by amount, descending.
    pub orders: Vec<OrderDetail>,

    /// Order identifiers that appeared more than once.
    pub duplicates: Vec<DuplicateOrderDetail>,

    /// Byte-identical image groups.
    pub duplicate_images_list: Vec<DuplicateImageGroup>,

    /// Images reported as failed, with partial fields when available.
    pub failed_files: Vec<FailedFile>,

    /// Images that could not be hashed.
    pub hash_failures: Vec<HashFailure>,

    /// Per-folder order statistics.
    pub folders: Vec<FolderSummary>,

    /// Recognized against expected total, over folders with an expectation.
    #[serde(default)]
    pub amount_check: Option<AmountCheck>,

    /// Copy failures while writing the deduplicated output.
    pub materialization_errors: Vec<MaterializationError>,
}

impl BatchReport {
    /// Images that produced no usable record for any reason.
    pub fn problem_count(&self) -> usize {
        self.failed_count + self.hash_failure_count + self.materialization_errors.len()
    }
}

/// One canonical order in the ranked list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetail {
    /// 1-based rank by amount.
    pub index: usize,
    pub order_number: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub filename: String,
    pub folder: String,
    pub relative_path: String,
    /// Materialized file name.
    pub deduped_name: String,
}

/// An order identifier extracted from more than one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateOrderDetail {
    pub order_number: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub original_file: String,
    pub duplicate_files: Vec<String>,
    pub duplicate_count: usize,
}

/// Images sharing one content hash. `files[0]` is the canonical member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateImageGroup {
    pub hash: String,
    pub files: Vec<String>,
    pub count: usize,
}

/// A canonical image without a usable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedFile {
    pub relative_path: String,
    pub reason: String,
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub amount: Option<Decimal>,
}

/// A file that could not be hashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashFailure {
    pub relative_path: String,
    pub error: String,
}

/// Orders and amount attributed to one folder label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderSummary {
    pub folder: String,
    pub orders: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    /// Present when an expected amount is configured for this folder.
    #[serde(default)]
    pub check: Option<AmountCheck>,
}

/// How far a recognized total is from its expected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Within one cent.
    Match,
    /// Below the configured tolerance.
    Close,
    LargeGap,
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Match => "match",
            Verdict::Close => "close",
            Verdict::LargeGap => "large gap",
        }
    }
}

/// A recognized total compared with its expected value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountCheck {
    #[serde(with = "rust_decimal::serde::float")]
    pub recognized: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub expected: Decimal,
    /// `recognized - expected`; negative means images are missing.
    #[serde(with = "rust_decimal::serde::float")]
    pub difference: Decimal,
    pub verdict: Verdict,
}

impl AmountCheck {
    pub fn new(recognized: Decimal, expected: Decimal, close_tolerance: Decimal) -> Self {
        let difference = (recognized - expected).round_dp(2);
        let gap = difference.abs();
        let verdict = if gap < Decimal::new(1, 2) {
            Verdict::Match
        } else if gap < close_tolerance {
            Verdict::Close
        } else {
            Verdict::LargeGap
        };
        Self {
            recognized,
            expected,
            difference,
            verdict,
        }
    }
}

/// A canonical image that could not be copied to the output tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializationError {
    pub relative_path: String,
    pub destination: String,
    pub error: String,
}
