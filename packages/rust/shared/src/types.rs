//! Core domain types for sitesort classification batches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SitesortError};

// ---------------------------------------------------------------------------
// Domain
// ---------------------------------------------------------------------------

/// A normalized, lowercase host name (protocol and `www.` stripped).
///
/// Values are produced by the input normalizer; this type does not
/// re-validate on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    /// Wrap an already-normalized host name.
    pub fn new(normalized: impl Into<String>) -> Self {
        Self(normalized.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// ExtractionMethod
// ---------------------------------------------------------------------------

/// Which text source feeds the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExtractionMethod {
    /// Visible text from the page HTML.
    #[default]
    #[serde(alias = "html")]
    Html,
    /// Text recognized from a page screenshot.
    #[serde(alias = "ocr")]
    Ocr,
    /// HTML text followed by OCR text.
    #[serde(alias = "both")]
    Both,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "HTML",
            Self::Ocr => "OCR",
            Self::Both => "BOTH",
        }
    }

    /// Whether this method needs a page screenshot.
    pub fn needs_screenshot(&self) -> bool {
        matches!(self, Self::Ocr | Self::Both)
    }
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExtractionMethod {
    type Err = SitesortError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HTML" => Ok(Self::Html),
            "OCR" => Ok(Self::Ocr),
            "BOTH" => Ok(Self::Both),
            other => Err(SitesortError::validation(format!(
                "unknown extraction method '{other}' (expected HTML, OCR or BOTH)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// ClassificationLabel
// ---------------------------------------------------------------------------

/// Category assigned to a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassificationLabel {
    /// Public-facing site promoting a product, service or brand.
    Marketing,
    /// Login-gated application or customer portal.
    Portal,
    /// Anything else that loaded successfully.
    Other,
    /// The domain could not be processed or served an error page.
    Error,
}

impl ClassificationLabel {
    pub const ALL: [ClassificationLabel; 4] = [Self::Marketing, Self::Portal, Self::Other, Self::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Marketing => "Marketing",
            Self::Portal => "Portal",
            Self::Other => "Other",
            Self::Error => "Error",
        }
    }
}

impl std::fmt::Display for ClassificationLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClassificationLabel {
    type Err = SitesortError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SitesortError::validation(format!("unknown classification label '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// ProcessingConfig
// ---------------------------------------------------------------------------

/// Per-batch processing options, snapshotted when the batch starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub method: ExtractionMethod,
    pub headless: bool,
    pub anti_detection: bool,
    pub workers: usize,
    pub overwrite: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            method: ExtractionMethod::Html,
            headless: true,
            anti_detection: false,
            workers: 4,
            overwrite: false,
        }
    }
}

impl ProcessingConfig {
    /// Reject configurations the scheduler cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(SitesortError::validation("workers must be at least 1"));
        }
        Ok(())
    }

    /// Human-readable description of the browsing mode, stored with each batch.
    pub fn processing_mode(&self) -> String {
        let mut mode = if self.headless { "headless" } else { "headful" }.to_string();
        if self.anti_detection {
            mode.push_str(" + anti-detection");
        }
        mode
    }
}

// ---------------------------------------------------------------------------
// ClassificationResult
// ---------------------------------------------------------------------------

/// One classified domain, as reported upward and stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub domain: Domain,
    pub classification_label: ClassificationLabel,
    pub summary: String,
    /// In `[0.0, 1.0]`; exactly `0.0` for `Error` results.
    pub confidence_level: f64,
    pub snippet: String,
    pub extraction_method: ExtractionMethod,
    pub processed_at: DateTime<Utc>,
    pub batch_id: BatchId,
}

impl ClassificationResult {
    /// Synthesize an `Error` result carrying the failure cause as its summary.
    pub fn error(
        domain: Domain,
        cause: impl Into<String>,
        extraction_method: ExtractionMethod,
        batch_id: BatchId,
    ) -> Self {
        Self {
            domain,
            classification_label: ClassificationLabel::Error,
            summary: cause.into(),
            confidence_level: 0.0,
            snippet: String::new(),
            extraction_method,
            processed_at: Utc::now(),
            batch_id,
        }
    }

    pub fn is_error(&self) -> bool {
        self.classification_label == ClassificationLabel::Error
    }

    /// Re-tag a result with another batch id (used for reused results).
    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = batch_id;
        self
    }
}

// ---------------------------------------------------------------------------
// BatchId
// ---------------------------------------------------------------------------

/// Batch identifier of the form `batch_<uuid v7>` (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Generate a new unique batch id.
    pub fn new() -> Self {
        Self(format!("batch_{}", Uuid::now_v7().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for BatchId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for BatchId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// BatchRecord
// ---------------------------------------------------------------------------

/// Lifecycle state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Processing,
    Completed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
        }
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = SitesortError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            other => Err(SitesortError::validation(format!("unknown batch status '{other}'"))),
        }
    }
}

/// Metadata and counters for one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: BatchId,
    pub total_domains: usize,
    pub config: ProcessingConfig,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: BatchStatus,
    #[serde(default)]
    pub processed: usize,
    #[serde(default)]
    pub succeeded: usize,
    #[serde(default)]
    pub failed: usize,
    #[serde(default)]
    pub skipped: usize,
}

impl BatchRecord {
    /// A freshly started batch with zeroed counters.
    pub fn start(batch_id: BatchId, total_domains: usize, config: ProcessingConfig) -> Self {
        Self {
            batch_id,
            total_domains,
            config,
            started_at: Utc::now(),
            completed_at: None,
            status: BatchStatus::Processing,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
        }
    }
}
