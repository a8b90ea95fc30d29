//! End-to-end batch pipeline: discover, hash, dispatch, aggregate.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use glob::{glob_with, MatchOptions, Pattern};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::aggregate::{self, Aggregation};
use crate::cache::FingerprintCache;
use crate::dispatch::{DispatchObserver, Dispatcher, NoopObserver};
use crate::error::{PayshotError, Result};
use crate::hashing::ContentHashIndex;
use crate::models::config::{is_nested_relative, PayshotConfig};
use crate::models::image::ImageRef;
use crate::models::report::BatchReport;
use crate::ocr::{Recognizer, TesseractRecognizer};

/// Accepted image extensions, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Recursively find images under `root`, skipping anything under `exclude`.
/// Results are sorted by relative path.
pub fn discover_images(root: &Path, exclude: Option<&Path>) -> Result<Vec<ImageRef>> {
    if !root.is_dir() {
        return Err(PayshotError::Input(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let root = root.canonicalize()?;
    let exclude = exclude.and_then(|p| p.canonicalize().ok());

    let root_str = root
        .to_str()
        .ok_or_else(|| PayshotError::Input(format!("non UTF-8 path: {}", root.display())))?;
    let pattern = format!("{}/**/*", Pattern::escape(root_str));
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let entries =
        glob_with(&pattern, options).map_err(|e| PayshotError::Input(e.to_string()))?;

    let mut images = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if !path.is_file() || !is_image(&path) {
            continue;
        }
        if exclude.as_deref().is_some_and(|ex| path.starts_with(ex)) {
            debug!("Skipping output file {}", path.display());
            continue;
        }

        match ImageRef::from_path(&root, &path) {
            Ok(image) => images.push(image),
            Err(e) => warn!("Cannot stat {}: {}", path.display(), e),
        }
    }

    images.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    info!("Found {} images under {}", images.len(), root.display());
    Ok(images)
}

/// One batch run over a root directory, writing into a result directory.
#[derive(Clone)]
pub struct BatchPipeline {
    root: PathBuf,
    result_dir: PathBuf,
    config: PayshotConfig,
    recognizer: Arc<dyn Recognizer>,
    observer: Arc<dyn DispatchObserver>,
}

impl BatchPipeline {
    /// Pipeline using the tesseract recognizer from `config.ocr`.
    pub fn new(root: impl Into<PathBuf>, result_dir: impl Into<PathBuf>, config: PayshotConfig) -> Self {
        let recognizer = Arc::new(TesseractRecognizer::new(config.ocr.clone()));
        Self {
            root: root.into(),
            result_dir: result_dir.into(),
            config,
            recognizer,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizer = recognizer;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    pub fn config(&self) -> &PayshotConfig {
        &self.config
    }

    pub fn cache_path(&self) -> PathBuf {
        self.result_dir.join(&self.config.output.cache_file)
    }

    pub fn report_path(&self) -> PathBuf {
        self.result_dir.join(&self.config.output.report_file)
    }

    pub fn deduped_dir(&self) -> PathBuf {
        self.result_dir.join(&self.config.output.deduped_dir)
    }

    /// Run the whole batch. Only an empty or missing input aborts; every
    /// per-file problem is reported in the returned [`BatchReport`].
    pub async fn run(&self) -> Result<BatchReport> {
        let start = Instant::now();
        self.config.validate().map_err(PayshotError::Config)?;

        let images = discover_images(&self.root, Some(&self.result_dir))?;
        if images.is_empty() {
            return Err(PayshotError::NoImages(self.root.clone()));
        }
        let total_files = images.len();

        let partition = tokio::task::spawn_blocking(move || ContentHashIndex::build(images)).await?;
        info!(
            "{} images, {} to recognize, {} duplicate groups",
            total_files,
            partition.canonical.len(),
            partition.groups.len()
        );

        let cache = Arc::new(Mutex::new(FingerprintCache::load(self.cache_path())));
        let dispatcher = Dispatcher::from_config(Arc::clone(&self.recognizer), &self.config);
        let outcomes = dispatcher
            .run(partition.canonical.clone(), Arc::clone(&cache), self.observer.as_ref())
            .await;

        if let Err(e) = cache.lock().await.flush() {
            warn!("Failed to save cache: {}", e);
        }

        let aggregation = Aggregation::from_outcomes(&outcomes);
        let materialization_errors = if self.config.output.copy_deduped {
            self.reset_deduped_dir();
            aggregate::materialize(&aggregation.ranked, &self.deduped_dir())
        } else {
            Vec::new()
        };

        let mut report = BatchReport::build(
            total_files,
            &partition,
            &outcomes,
            &aggregation,
            materialization_errors,
        );
        report.reconcile(&self.config.reconcile);
        self.write_report(&report);

        info!(
            "Batch finished in {:?}: {} succeeded, {} failed, {} unique orders, total {}",
            start.elapsed(),
            report.success_count,
            report.failed_count,
            report.unique_orders,
            report.total_amount
        );
        Ok(report)
    }

    fn reset_deduped_dir(&self) {
        let dir = self.deduped_dir();
        if !is_nested_relative(&self.config.output.deduped_dir) {
            warn!("Refusing to clear {}: not below {}", dir.display(), self.result_dir.display());
            return;
        }
        if dir.exists() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!("Failed to clear {}: {}", dir.display(), e);
            }
        }
    }

    fn write_report(&self, report: &BatchReport) {
        let path = self.report_path();
        let result = fs::create_dir_all(&self.result_dir)
            .map_err(PayshotError::from)
            .and_then(|_| serde_json::to_string_pretty(report).map_err(PayshotError::from))
            .and_then(|json| fs::write(&path, json).map_err(PayshotError::from));

        match result {
            Ok(()) => info!("Report written to {}", path.display()),
            Err(e) => warn!("Failed to write report {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, relative.as_bytes()).unwrap();
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for name in ["b.PNG", "a.jpg", "shop/c.JPEG", "notes.txt", "shop/d.gif", "out/old.jpg"] {
            touch(root, name);
        }

        let images = discover_images(root, Some(&root.join("out"))).unwrap();
        let names: Vec<&str> = images.iter().map(|i| i.relative_path.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG", "shop/c.JPEG"]);
    }

    #[test]
    fn test_discover_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let result = discover_images(&dir.path().join("missing"), None);
        assert!(matches!(result, Err(PayshotError::Input(_))));
    }

    #[tokio::test]
    async fn test_empty_batch_aborts() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "readme.txt");
        let pipeline = BatchPipeline::new(dir.path(), dir.path().join("result"), PayshotConfig::default());
        let result = pipeline.run().await;
        assert!(matches!(result, Err(PayshotError::NoImages(_))));
    }

    #[tokio::test]
    async fn test_unsafe_deduped_dir_leaves_result_dir_intact() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "in/a.jpg");
        let result_dir = dir.path().join("result");
        touch(&result_dir, "keep.txt");

        let mut config = PayshotConfig::default();
        config.output.deduped_dir = PathBuf::new();
        let pipeline = BatchPipeline::new(dir.path().join("in"), &result_dir, config);

        let result = pipeline.run().await;
        assert!(matches!(result, Err(PayshotError::Config(_))));
        assert!(result_dir.join("keep.txt").exists());

        pipeline.reset_deduped_dir();
        assert!(result_dir.join("keep.txt").exists());
    }

    #[test]
    fn test_reset_only_clears_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let result_dir = dir.path().join("result");
        touch(&result_dir, "keep.txt");
        touch(&result_dir, "deduped/old.jpg");

        for unsafe_dir in ["..", "."] {
            let mut config = PayshotConfig::default();
            config.output.deduped_dir = PathBuf::from(unsafe_dir);
            BatchPipeline::new(dir.path(), &result_dir, config).reset_deduped_dir();
            assert!(result_dir.join("keep.txt").exists());
        }

        BatchPipeline::new(dir.path(), &result_dir, PayshotConfig::default()).reset_deduped_dir();
        assert!(!result_dir.join("deduped").exists());
        assert!(result_dir.join("keep.txt").exists());
    }

    #[test]
    fn test_output_paths_follow_config() {
        let mut config = PayshotConfig::default();
        config.output.report_file = PathBuf::from("summary.json");
        let pipeline = BatchPipeline::new("/in", "/out", config);
        assert_eq!(pipeline.cache_path(), PathBuf::from("/out/ocr_cache.json"));
        assert_eq!(pipeline.report_path(), PathBuf::from("/out/summary.json"));
        assert_eq!(pipeline.deduped_dir(), PathBuf::from("/out/deduped"));
    }
}
