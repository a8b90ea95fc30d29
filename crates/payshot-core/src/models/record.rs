//! Per-image extraction records and dispatch outcomes.

use chrono::Local;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::image::ImageRef;

/// Timestamp format stored in `extraction_time`.
pub const EXTRACTION_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fields extracted from one image, as persisted in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    /// Recognized order identifier.
    #[serde(default)]
    pub order_number: Option<String>,

    /// Recognized transaction amount.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub amount: Option<Decimal>,

    /// Folder grouping label (relative parent directory).
    #[serde(default)]
    pub folder: String,

    /// Path relative to the batch root.
    #[serde(default)]
    pub relative_path: String,

    /// Local time the record was produced.
    #[serde(default)]
    pub extraction_time: String,
}

impl ExtractionRecord {
    /// Create a record for `image` stamped with the current local time.
    pub fn new(image: &ImageRef, order_number: Option<String>, amount: Option<Decimal>) -> Self {
        Self {
            order_number,
            amount,
            folder: image.folder(),
            relative_path: image.relative_path.clone(),
            extraction_time: Local::now().format(EXTRACTION_TIME_FORMAT).to_string(),
        }
    }

    /// Both the order identifier and the amount are present and non-empty.
    pub fn is_complete(&self) -> bool {
        self.order_number.as_deref().is_some_and(|n| !n.trim().is_empty())
            && self.amount.is_some()
    }
}

/// Terminal state of one canonical image after dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeKind {
    /// Served from the fingerprint cache without recognition.
    Cached(ExtractionRecord),

    /// Recognized in this run; both fields present.
    Recognized(ExtractionRecord),

    /// Recognition ran but at least one field is missing. Partial values are
    /// kept for diagnostics only.
    Failed {
        order_number: Option<String>,
        amount: Option<Decimal>,
    },

    /// Unexpected error while processing the image.
    Error(String),
}

/// Outcome for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageOutcome {
    pub image: ImageRef,
    pub kind: OutcomeKind,
}

impl ImageOutcome {
    pub fn new(image: ImageRef, kind: OutcomeKind) -> Self {
        Self { image, kind }
    }

    /// The complete record, for cache hits and fresh successes.
    pub fn record(&self) -> Option<&ExtractionRecord> {
        match &self.kind {
            OutcomeKind::Cached(record) | OutcomeKind::Recognized(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.record().is_some()
    }

    pub fn is_cached(&self) -> bool {
        matches!(self.kind, OutcomeKind::Cached(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_is_complete() {
        let mut record = ExtractionRecord {
            order_number: Some("4200002791202509217955512".to_string()),
            amount: Some(Decimal::from_str("12.50").unwrap()),
            folder: ".".to_string(),
            relative_path: "a.jpg".to_string(),
            extraction_time: String::new(),
        };
        assert!(record.is_complete());

        record.amount = None;
        assert!(!record.is_complete());

        record.amount = Some(Decimal::ONE);
        record.order_number = Some("  ".to_string());
        assert!(!record.is_complete());
    }

    #[test]
    fn test_record_json_shape() {
        let json = r#"{
            "order_number": "100012345678901234567890",
            "amount": 128.5,
            "folder": "shop",
            "relative_path": "shop/a.jpg",
            "extraction_time": "2025-09-21 10:00:00"
        }"#;
        let record: ExtractionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.amount, Some(Decimal::from_str("128.5").unwrap()));
        assert!(record.is_complete());

        let value = serde_json::to_value(&record).unwrap();
        assert!(value["amount"].is_number());
        assert_eq!(value["relative_path"], "shop/a.jpg");
    }

    #[test]
    fn test_missing_fields_deserialize_as_incomplete() {
        let record: ExtractionRecord = serde_json::from_str(r#"{"folder": "x"}"#).unwrap();
        assert!(!record.is_complete());
    }
}
