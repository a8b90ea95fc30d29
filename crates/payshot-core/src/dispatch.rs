//! Bounded-concurrency recognition dispatcher.
//!
//! Each canonical image is processed independently: a fingerprint cache hit
//! short-circuits, otherwise the fast pass runs, and the deep pass is tried
//! only when a field is still missing. Workers return their outcome to the
//! coordinator; the only shared state is the cache behind a mutex.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::FingerprintCache;
use crate::extract::PaymentParser;
use crate::models::config::PayshotConfig;
use crate::models::image::ImageRef;
use crate::models::record::{ExtractionRecord, ImageOutcome, OutcomeKind};
use crate::ocr::{self, Recognizer};

/// Default number of images recognized at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

const PREVIEW_CHARS: usize = 200;

/// Progress hooks invoked by [`Dispatcher::run`].
pub trait DispatchObserver: Send + Sync {
    /// Called once before any image is processed.
    fn on_start(&self, _total: usize) {}

    /// Called as each image finishes, in completion order.
    fn on_outcome(&self, _outcome: &ImageOutcome) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DispatchObserver for NoopObserver {}

#[derive(Clone)]
struct Worker {
    recognizer: Arc<dyn Recognizer>,
    parser: Arc<PaymentParser>,
}

impl Worker {
    async fn process(&self, image: ImageRef, cache: Arc<Mutex<FingerprintCache>>) -> ImageOutcome {
        let fingerprint = image.fingerprint();

        let hit = cache.lock().await.lookup(&fingerprint);
        if let Some(record) = hit {
            debug!("cache hit: {}", image.relative_path);
            return ImageOutcome::new(image, OutcomeKind::Cached(record));
        }

        if let Err(e) = tokio::fs::metadata(&image.path).await {
            warn!("Cannot read {}: {}", image.relative_path, e);
            return ImageOutcome::new(image, OutcomeKind::Error(e.to_string()));
        }

        let recognizer = self.recognizer.as_ref();
        let fast_text = ocr::fast_pass(recognizer, &image.path).await;
        debug!("{} fast pass: {}", image.relative_path, preview(&fast_text));

        let mut fields = self.parser.parse(&fast_text);
        if !fields.is_complete() {
            debug!("{} incomplete after fast pass, running deep pass", image.relative_path);
            let deep_text = ocr::deep_pass(recognizer, &image.path).await;
            debug!("{} deep pass: {}", image.relative_path, preview(&deep_text));
            fields = self.parser.complete(fields, &fast_text, &deep_text);
        }

        if !fields.is_complete() {
            info!(
                "Failed: {} (order number: {}, amount: {})",
                image.relative_path,
                fields.order_number().as_deref().unwrap_or("-"),
                fields.amount().map(|a| a.to_string()).as_deref().unwrap_or("-")
            );
            let kind = OutcomeKind::Failed {
                order_number: fields.order_number(),
                amount: fields.amount(),
            };
            return ImageOutcome::new(image, kind);
        }

        let record = ExtractionRecord::new(&image, fields.order_number(), fields.amount());
        info!(
            "Recognized: {} -> {} ¥{}",
            image.relative_path,
            record.order_number.as_deref().unwrap_or_default(),
            record.amount.unwrap_or_default()
        );
        cache.lock().await.put(fingerprint, record.clone());
        ImageOutcome::new(image, OutcomeKind::Recognized(record))
    }
}

fn preview(text: &str) -> String {
    let flat = text.replace('\n', " | ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

/// Runs recognition for a canonical image set.
#[derive(Clone)]
pub struct Dispatcher {
    worker: Worker,
    concurrency: usize,
}

impl Dispatcher {
    pub fn new(recognizer: Arc<dyn Recognizer>) -> Self {
        Self {
            worker: Worker {
                recognizer,
                parser: Arc::new(PaymentParser::new()),
            },
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Dispatcher configured from `config.dispatch` and `config.extraction`.
    pub fn from_config(recognizer: Arc<dyn Recognizer>, config: &PayshotConfig) -> Self {
        Self::new(recognizer)
            .with_parser(PaymentParser::from_config(&config.extraction))
            .with_concurrency(config.dispatch.concurrency)
    }

    pub fn with_parser(mut self, parser: PaymentParser) -> Self {
        self.worker.parser = Arc::new(parser);
        self
    }

    /// Set the worker limit. Zero is treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Process every image and return outcomes sorted by relative path.
    ///
    /// Each image runs on its own tokio task so a panicking worker becomes an
    /// [`OutcomeKind::Error`] instead of aborting the batch. New cache entries
    /// are only held in memory; the caller flushes after this returns.
    pub async fn run(
        &self,
        images: Vec<ImageRef>,
        cache: Arc<Mutex<FingerprintCache>>,
        observer: &dyn DispatchObserver,
    ) -> Vec<ImageOutcome> {
        info!(
            "Dispatching {} images with concurrency {}",
            images.len(),
            self.concurrency
        );
        observer.on_start(images.len());

        let mut outcomes: Vec<ImageOutcome> = stream::iter(images)
            .map(|image| {
                let worker = self.worker.clone();
                let cache = Arc::clone(&cache);
                async move {
                    let fallback = image.clone();
                    match tokio::spawn(async move { worker.process(image, cache).await }).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!("Worker for {} aborted: {}", fallback.relative_path, e);
                            ImageOutcome::new(fallback, OutcomeKind::Error(e.to_string()))
                        }
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .inspect(|outcome| observer.on_outcome(outcome))
            .collect()
            .await;

        outcomes.sort_by(|a, b| a.image.relative_path.cmp(&b.image.relative_path));

        let cached = outcomes.iter().filter(|o| o.is_cached()).count();
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        info!(
            "Dispatch complete: {} succeeded ({} cached), {} failed",
            succeeded,
            cached,
            outcomes.len() - succeeded
        );

        outcomes
    }
}
