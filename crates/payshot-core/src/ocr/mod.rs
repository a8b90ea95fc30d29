//! Text recognition boundary.
//!
//! Recognition itself is an external capability: given an image path and a
//! mode it returns raw text. [`TesseractRecognizer`] drives the `tesseract`
//! binary; tests substitute scripted implementations of [`Recognizer`].

mod tesseract;

pub use tesseract::TesseractRecognizer;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::error::OcrError;

/// Recognition effort requested from the recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecognitionMode {
    /// Combined-language recognition with automatic segmentation.
    Default,
    /// Alternate page segmentation mode, used by the deep pass.
    Segmentation(u8),
}

impl fmt::Display for RecognitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionMode::Default => f.write_str("default"),
            RecognitionMode::Segmentation(psm) => write!(f, "psm {}", psm),
        }
    }
}

/// External text recognizer.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognize the text in one image.
    async fn recognize(&self, image: &Path, mode: RecognitionMode) -> Result<String, OcrError>;

    /// Modes run by the deep pass, in order.
    fn deep_modes(&self) -> Vec<RecognitionMode> {
        vec![
            RecognitionMode::Segmentation(6),
            RecognitionMode::Segmentation(11),
            RecognitionMode::Segmentation(12),
        ]
    }
}

/// Run the fast pass. A recognizer failure degrades to empty text so the
/// deep pass still gets its chance.
pub async fn fast_pass(recognizer: &dyn Recognizer, image: &Path) -> String {
    match recognizer.recognize(image, RecognitionMode::Default).await {
        Ok(text) => text,
        Err(e) => {
            debug!("fast pass failed for {}: {}", image.display(), e);
            String::new()
        }
    }
}

/// Run every deep mode and join the outputs with newlines. Failed modes are
/// skipped.
pub async fn deep_pass(recognizer: &dyn Recognizer, image: &Path) -> String {
    let mut texts = Vec::new();

    for mode in recognizer.deep_modes() {
        match recognizer.recognize(image, mode).await {
            Ok(text) => texts.push(text),
            Err(e) => debug!("deep pass ({}) failed for {}: {}", mode, image.display(), e),
        }
    }

    texts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        calls: Mutex<Vec<RecognitionMode>>,
    }

    #[async_trait]
    impl Recognizer for Scripted {
        async fn recognize(&self, _image: &Path, mode: RecognitionMode) -> Result<String, OcrError> {
            self.calls.lock().unwrap().push(mode);
            match mode {
                RecognitionMode::Default => Err(OcrError::Timeout(15)),
                RecognitionMode::Segmentation(11) => Err(OcrError::Recognition("crash".into())),
                RecognitionMode::Segmentation(psm) => Ok(format!("text {}", psm)),
            }
        }
    }

    #[tokio::test]
    async fn test_fast_pass_degrades_to_empty() {
        let recognizer = Scripted { calls: Mutex::new(Vec::new()) };
        assert_eq!(fast_pass(&recognizer, Path::new("a.jpg")).await, "");
    }

    #[tokio::test]
    async fn test_deep_pass_skips_failed_modes() {
        let recognizer = Scripted { calls: Mutex::new(Vec::new()) };
        let text = deep_pass(&recognizer, Path::new("a.jpg")).await;
        assert_eq!(text, "text 6\ntext 12");
        assert_eq!(recognizer.calls.lock().unwrap().len(), 3);
    }
}
