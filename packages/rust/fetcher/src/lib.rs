//! Page retrieval for domain classification.
//!
//! This crate provides:
//! - [`Fetcher`], the collaborator trait the pipeline fetches pages through
//! - [`HttpFetcher`], a plain HTTP implementation built on `reqwest`
//! - [`BrowserFetcher`], a Chrome-rendered implementation that can take
//!   screenshots for OCR

pub mod browser;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;

use sitesort_shared::{Domain, Result};

pub use browser::BrowserFetcher;
pub use http::HttpFetcher;

/// Per-request browsing options derived from the batch's processing config.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Run without a visible browser window. [`HttpFetcher`] ignores this.
    pub headless: bool,
    /// Present browser-like request headers.
    pub anti_detection: bool,
    /// Capture a screenshot for OCR.
    pub screenshot: bool,
    /// Deadline for the whole request.
    pub timeout: Duration,
}

/// Raw material retrieved for one domain.
#[derive(Debug, Clone, Default)]
pub struct FetchedPayload {
    /// Response body, when the page was fetched as HTML.
    pub html: Option<String>,
    /// Encoded screenshot image (PNG), when one was captured.
    pub screenshot: Option<Vec<u8>>,
}

/// Retrieves page content for a domain.
///
/// Implementations return [`SitesortError::Fetch`](sitesort_shared::SitesortError::Fetch)
/// for timeouts, network failures and blocked responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, domain: &Domain, options: &FetchOptions) -> Result<FetchedPayload>;
}
