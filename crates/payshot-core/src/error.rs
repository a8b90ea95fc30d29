//! Error types for the payshot-core library.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the payshot library.
#[derive(Error, Debug)]
pub enum PayshotError {
    /// Text recognition error.
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    /// Cache persistence error.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A blocking or background job panicked or was cancelled.
    #[error("background job failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The batch root contained no image files.
    #[error("no image files found under {}", .0.display())]
    NoImages(PathBuf),

    /// Invalid input pattern or root directory.
    #[error("invalid input: {0}")]
    Input(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A background task with this id is already running.
    #[error("task {0} is already running")]
    TaskBusy(String),

    /// No task registered under this id.
    #[error("task {0} not found")]
    TaskNotFound(String),
}

/// Errors raised by the external recognizer.
#[derive(Error, Debug)]
pub enum OcrError {
    /// The recognizer process could not be started.
    #[error("failed to spawn recognizer: {0}")]
    Spawn(String),

    /// The recognizer did not answer within the per-call limit.
    #[error("recognizer timed out after {0}s")]
    Timeout(u64),

    /// The recognizer ran but reported failure.
    #[error("text recognition failed: {0}")]
    Recognition(String),
}

/// Errors related to the fingerprint cache file.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Cache file is not a valid cache document.
    #[error("malformed cache {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Cache file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Store could not be serialized.
    #[error("failed to serialize cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type for the payshot library.
pub type Result<T> = std::result::Result<T, PayshotError>;
