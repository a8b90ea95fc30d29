//! Configuration structures for the batch pipeline.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main configuration for the payshot pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PayshotConfig {
    /// Recognizer configuration.
    pub ocr: OcrConfig,

    /// Concurrency configuration.
    pub dispatch: DispatchConfig,

    /// Field extraction configuration.
    pub extraction: ExtractionConfig,

    /// Output layout configuration.
    pub output: OutputConfig,

    /// Expected per-folder totals to check recognized amounts against.
    pub reconcile: ReconcileConfig,
}

/// External recognizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Recognizer binary name or path.
    pub binary: String,

    /// Language pack used by the fast pass.
    pub language: String,

    /// Per-call timeout in seconds.
    pub timeout_secs: u64,

    /// Page segmentation modes run by the deep pass, in order.
    pub deep_psm_modes: Vec<u8>,

    /// Retry the fast pass without a language flag when it fails.
    pub fallback_without_language: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            language: "chi_sim+eng".to_string(),
            timeout_secs: 15,
            deep_psm_modes: vec![6, 11, 12],
            fallback_without_language: true,
        }
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum number of images recognized at once.
    pub concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// Field extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Order identifier prefixes accepted even when they look like a year.
    pub known_prefixes: Vec<String>,

    /// Explicit year prefixes to reject. Empty means derive from the clock.
    pub rejected_year_prefixes: Vec<String>,

    /// How many years (including the current one) count as "recent".
    pub year_window: u32,

    /// Minimum digit ratio for boundary-less cross-line candidates.
    pub min_digit_ratio: f64,

    /// Exclusive upper bound for fallback amounts.
    pub max_amount: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            known_prefixes: vec!["4200".to_string(), "1000".to_string(), "372".to_string()],
            rejected_year_prefixes: Vec::new(),
            year_window: 3,
            min_digit_ratio: 0.7,
            max_amount: 100_000,
        }
    }
}

/// Output layout configuration, relative to the result directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving one file per unique order.
    pub deduped_dir: PathBuf,

    /// Fingerprint cache document.
    pub cache_file: PathBuf,

    /// JSON report.
    pub report_file: PathBuf,

    /// Copy canonical images into `deduped_dir`.
    pub copy_deduped: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            deduped_dir: PathBuf::from("deduped"),
            cache_file: PathBuf::from("ocr_cache.json"),
            report_file: PathBuf::from("report.json"),
            copy_deduped: true,
        }
    }
}

/// Expected amounts per folder label.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Expected total per folder label (`"."` for the batch root).
    pub expected_amounts: BTreeMap<String, Decimal>,

    /// Differences below this are reported as close rather than a large gap.
    #[serde(with = "rust_decimal::serde::float")]
    pub close_tolerance: Decimal,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            expected_amounts: BTreeMap::new(),
            close_tolerance: Decimal::from(50),
        }
    }
}

impl PayshotConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, content)
    }

    /// Check values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.dispatch.concurrency == 0 {
            return Err("dispatch.concurrency must be at least 1".to_string());
        }
        if self.ocr.timeout_secs == 0 {
            return Err("ocr.timeout_secs must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.extraction.min_digit_ratio) {
            return Err("extraction.min_digit_ratio must be within 0.0..=1.0".to_string());
        }
        if self.reconcile.close_tolerance <= Decimal::ZERO {
            return Err("reconcile.close_tolerance must be positive".to_string());
        }
        if let Some((folder, _)) = self
            .reconcile
            .expected_amounts
            .iter()
            .find(|(_, amount)| amount.is_sign_negative())
        {
            return Err(format!("reconcile.expected_amounts.{} must not be negative", folder));
        }
        for (key, path) in [
            ("output.deduped_dir", &self.output.deduped_dir),
            ("output.cache_file", &self.output.cache_file),
            ("output.report_file", &self.output.report_file),
        ] {
            if !is_nested_relative(path) {
                return Err(format!(
                    "{} must be a relative path below the result directory, got {:?}",
                    key, path
                ));
            }
        }
        Ok(())
    }
}

/// True when `path` names something strictly below the directory it is
/// joined to: relative, no `..`, and at least one normal component.
pub fn is_nested_relative(path: &Path) -> bool {
    let mut named = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => named = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    named
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: PayshotConfig =
            serde_json::from_str(r#"{"dispatch": {"concurrency": 8}}"#).unwrap();
        assert_eq!(config.dispatch.concurrency, 8);
        assert_eq!(config.ocr.deep_psm_modes, vec![6, 11, 12]);
        assert_eq!(config.output.cache_file, PathBuf::from("ocr_cache.json"));
    }

    #[test]
    fn test_validate() {
        let mut config = PayshotConfig::default();
        assert!(config.validate().is_ok());
        config.dispatch.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_output_paths_outside_result_dir() {
        for bad in ["", ".", "..", "../deduped", "deduped/../..", "/tmp/deduped"] {
            let mut config = PayshotConfig::default();
            config.output.deduped_dir = PathBuf::from(bad);
            let err = config.validate().unwrap_err();
            assert!(err.contains("output.deduped_dir"), "{bad:?}: {err}");
        }

        let mut config = PayshotConfig::default();
        config.output.cache_file = PathBuf::from("../ocr_cache.json");
        assert!(config.validate().unwrap_err().contains("output.cache_file"));

        let mut config = PayshotConfig::default();
        config.output.report_file = PathBuf::new();
        assert!(config.validate().unwrap_err().contains("output.report_file"));

        let mut config = PayshotConfig::default();
        config.output.deduped_dir = PathBuf::from("./out/deduped");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expected_amounts_accept_numbers() {
        let config: PayshotConfig = serde_json::from_str(
            r#"{"reconcile": {"expected_amounts": {"shop": 2980, ".": "12.50"}}}"#,
        )
        .unwrap();
        assert_eq!(config.reconcile.expected_amounts["shop"], Decimal::from(2980));
        assert_eq!(config.reconcile.expected_amounts["."], Decimal::new(1250, 2));
        assert_eq!(config.reconcile.close_tolerance, Decimal::from(50));
        assert!(config.validate().is_ok());

        let mut config = config;
        config.reconcile.expected_amounts.insert("bad".to_string(), Decimal::from(-1));
        assert!(config.validate().unwrap_err().contains("bad"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = PayshotConfig::default();
        config.ocr.timeout_secs = 30;
        config.save(&path).unwrap();

        let loaded = PayshotConfig::from_file(&path).unwrap();
        assert_eq!(loaded.ocr.timeout_secs, 30);
    }
}
