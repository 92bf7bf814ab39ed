//! Text extraction from fetched pages.
//!
//! This crate provides:
//! - [`Extractor`], the collaborator trait turning a payload into classifier input
//! - [`ExtractorFactory`], which hands each pipeline worker its own extractor
//! - [`PageExtractor`], HTML text extraction plus OCR through an [`OcrEngine`]
//! - [`text`] helpers for visible text, snippets and truncation

pub mod ocr;
pub mod text;

use async_trait::async_trait;
use tracing::debug;

use sitesort_fetcher::FetchedPayload;
use sitesort_shared::{OcrConfig, Result, SitesortError};

pub use ocr::{OcrEngine, TesseractEngine};
pub use text::{html_to_text, snippet};

/// One extraction path. `BOTH` batches run each path in turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionSource {
    Html,
    Ocr,
}

/// Turns a fetched payload into plain text.
///
/// Each pipeline worker owns one extractor, hence `&mut self`.
#[async_trait]
pub trait Extractor: Send {
    async fn extract(&mut self, payload: &FetchedPayload, source: ExtractionSource)
    -> Result<String>;
}

/// Creates the extractor owned by one worker.
pub trait ExtractorFactory: Send + Sync {
    fn create(&self, worker_id: usize) -> Result<Box<dyn Extractor>>;
}

// ---------------------------------------------------------------------------
// PageExtractor
// ---------------------------------------------------------------------------

/// Default extractor: visible HTML text, or OCR of the screenshot.
pub struct PageExtractor {
    ocr: Box<dyn OcrEngine>,
}

impl PageExtractor {
    pub fn new(ocr: Box<dyn OcrEngine>) -> Self {
        Self { ocr }
    }
}

#[async_trait]
impl Extractor for PageExtractor {
    async fn extract(
        &mut self,
        payload: &FetchedPayload,
        source: ExtractionSource,
    ) -> Result<String> {
        match source {
            ExtractionSource::Html => {
                let html = payload
                    .html
                    .as_deref()
                    .ok_or_else(|| SitesortError::Extract("no HTML content fetched".into()))?;
                let text = html_to_text(html);
                debug!(html_bytes = html.len(), text_chars = text.len(), "extracted HTML text");
                Ok(text)
            }
            ExtractionSource::Ocr => {
                let image = payload
                    .screenshot
                    .as_deref()
                    .ok_or_else(|| SitesortError::Extract("no screenshot captured".into()))?;
                let raw = self.ocr.recognize(image).await?;
                Ok(text::collapse_whitespace(&raw))
            }
        }
    }
}

/// Builds a [`PageExtractor`] with a fresh [`TesseractEngine`] per worker.
#[derive(Debug, Clone, Default)]
pub struct PageExtractorFactory {
    ocr: OcrConfig,
}

impl PageExtractorFactory {
    pub fn new(ocr: OcrConfig) -> Self {
        Self { ocr }
    }
}

impl ExtractorFactory for PageExtractorFactory {
    fn create(&self, worker_id: usize) -> Result<Box<dyn Extractor>> {
        debug!(worker_id, cmd = %self.ocr.tesseract_cmd, "creating extractor");
        let engine = TesseractEngine::from(&self.ocr);
        Ok(Box::new(PageExtractor::new(Box::new(engine))))
    }
}
