//! OCR engines.
//!
//! Engines are created per worker and never shared, so implementations may
//! hold per-instance state (warm processes, scratch buffers) without locking.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use sitesort_shared::{OcrConfig, Result, SitesortError};

/// Recognizes text in an encoded image.
#[async_trait]
pub trait OcrEngine: Send {
    async fn recognize(&mut self, image: &[u8]) -> Result<String>;
}

// ---------------------------------------------------------------------------
// TesseractEngine
// ---------------------------------------------------------------------------

/// Runs the `tesseract` command-line tool, piping the image through stdin.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    command: String,
    language: String,
}

impl TesseractEngine {
    pub fn new(command: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            language: language.into(),
        }
    }
}

impl From<&OcrConfig> for TesseractEngine {
    fn from(config: &OcrConfig) -> Self {
        Self::new(&config.tesseract_cmd, &config.language)
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    #[instrument(skip_all, fields(bytes = image.len(), lang = %self.language))]
    async fn recognize(&mut self, image: &[u8]) -> Result<String> {
        let mut child = Command::new(&self.command)
            .args(["stdin", "stdout", "-l", &self.language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SitesortError::Extract(format!("failed to start '{}': {e}", self.command))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SitesortError::Extract("failed to open OCR stdin".into()))?;
        let input = image.to_vec();
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&input).await;
            drop(stdin);
            result
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SitesortError::Extract(format!("OCR process failed: {e}")))?;

        // A broken pipe here means the process exited early; its status says why.
        if let Ok(Err(e)) = writer.await {
            debug!(error = %e, "OCR stdin write failed");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SitesortError::Extract(format!(
                "OCR exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(chars = text.len(), "OCR complete");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_extract_error() {
        let mut engine = TesseractEngine::new("sitesort-no-such-tesseract", "eng");
        let err = engine.recognize(b"not an image").await.unwrap_err();
        assert!(matches!(err, SitesortError::Extract(_)));
        assert!(err.to_string().contains("failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_extract_error() {
        let mut engine = TesseractEngine::new("false", "eng");
        let err = engine.recognize(b"not an image").await.unwrap_err();
        assert!(err.to_string().contains("OCR exited"));
    }

    #[test]
    fn builds_from_config() {
        let engine = TesseractEngine::from(&OcrConfig::default());
        assert_eq!(engine.command, "tesseract");
        assert_eq!(engine.language, "eng");
    }
}
