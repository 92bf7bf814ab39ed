//! AI classification of extracted site text.
//!
//! This crate provides:
//! - [`Classifier`], the collaborator trait the pipeline classifies through
//! - [`OpenAiClassifier`], an OpenAI / Azure OpenAI implementation using a
//!   forced `classify_site` tool call

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sitesort_shared::{ClassificationLabel, Domain, Result};

pub use openai::OpenAiClassifier;

/// Raw classifier verdict for one domain, before pipeline validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: ClassificationLabel,
    pub confidence: f64,
    pub summary: String,
    pub snippet: String,
}

/// Assigns a label to a domain given its extracted text.
///
/// Implementations return
/// [`SitesortError::Classify`](sitesort_shared::SitesortError::Classify) when
/// the provider fails or answers with unusable output.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, domain: &Domain, text: &str) -> Result<Classification>;
}
