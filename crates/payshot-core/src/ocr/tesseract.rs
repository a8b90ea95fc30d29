//! Tesseract CLI recognizer.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{RecognitionMode, Recognizer};
use crate::error::OcrError;
use crate::models::config::OcrConfig;

/// Recognizer backed by the `tesseract` binary.
///
/// Every call is bounded by `timeout_secs`; the child process is killed when
/// the timeout fires.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    config: OcrConfig,
}

impl TesseractRecognizer {
    pub fn new(config: OcrConfig) -> Self {
        Self { config }
    }

    /// Report the installed tesseract version (first line of `--version`).
    pub async fn version(&self) -> Result<String, OcrError> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("--version");
        let output = self.run(cmd).await?;
        Ok(output.lines().next().unwrap_or_default().trim().to_string())
    }

    fn command(&self, image: &Path, mode: RecognitionMode, with_language: bool) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg(image).arg("stdout");

        match mode {
            RecognitionMode::Default => {
                if with_language && !self.config.language.is_empty() {
                    cmd.arg("-l").arg(&self.config.language);
                }
            }
            RecognitionMode::Segmentation(psm) => {
                cmd.arg("--psm").arg(psm.to_string());
            }
        }

        cmd
    }

    async fn run(&self, mut cmd: Command) -> Result<String, OcrError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let limit = Duration::from_secs(self.config.timeout_secs);

        let output = tokio::time::timeout(limit, cmd.output())
            .await
            .map_err(|_| OcrError::Timeout(self.config.timeout_secs))?
            .map_err(|e| OcrError::Spawn(format!("{}: {}", self.config.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Recognition(format!(
                "{} exited with {}: {}",
                self.config.binary,
                output.status,
                stderr.trim()
            )));
        }

        trace!("recognizer finished in {}ms", start.elapsed().as_millis());
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for TesseractRecognizer {
    fn default() -> Self {
        Self::new(OcrConfig::default())
    }
}

#[async_trait]
impl Recognizer for TesseractRecognizer {
    async fn recognize(&self, image: &Path, mode: RecognitionMode) -> Result<String, OcrError> {
        match mode {
            RecognitionMode::Default => {
                match self.run(self.command(image, mode, true)).await {
                    Ok(text) => Ok(text),
                    Err(e) if self.config.fallback_without_language => {
                        debug!(
                            "{} failed with language {}, retrying without: {}",
                            image.display(),
                            self.config.language,
                            e
                        );
                        self.run(self.command(image, mode, false)).await
                    }
                    Err(e) => Err(e),
                }
            }
            RecognitionMode::Segmentation(_) => self.run(self.command(image, mode, false)).await,
        }
    }

    fn deep_modes(&self) -> Vec<RecognitionMode> {
        self.config
            .deep_psm_modes
            .iter()
            .map(|psm| RecognitionMode::Segmentation(*psm))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_default_mode_arguments() {
        let recognizer = TesseractRecognizer::default();
        let cmd = recognizer.command(Path::new("a.jpg"), RecognitionMode::Default, true);
        assert_eq!(args(&cmd), vec!["a.jpg", "stdout", "-l", "chi_sim+eng"]);

        let fallback = recognizer.command(Path::new("a.jpg"), RecognitionMode::Default, false);
        assert_eq!(args(&fallback), vec!["a.jpg", "stdout"]);
    }

    #[test]
    fn test_segmentation_mode_arguments() {
        let recognizer = TesseractRecognizer::default();
        let cmd = recognizer.command(Path::new("a.jpg"), RecognitionMode::Segmentation(11), true);
        assert_eq!(args(&cmd), vec!["a.jpg", "stdout", "--psm", "11"]);
    }

    #[test]
    fn test_deep_modes_follow_config() {
        let recognizer = TesseractRecognizer::new(OcrConfig {
            deep_psm_modes: vec![4, 6],
            ..OcrConfig::default()
        });
        assert_eq!(
            recognizer.deep_modes(),
            vec![RecognitionMode::Segmentation(4), RecognitionMode::Segmentation(6)]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let recognizer = TesseractRecognizer::new(OcrConfig {
            binary: "payshot-no-such-recognizer".to_string(),
            ..OcrConfig::default()
        });
        let result = recognizer
            .recognize(Path::new("a.jpg"), RecognitionMode::Segmentation(6))
            .await;
        assert!(matches!(result, Err(OcrError::Spawn(_))));
    }
}
