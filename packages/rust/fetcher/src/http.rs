//! Plain HTTP fetcher.
//!
//! Requests `https://<domain>/` and returns the response body as HTML. It
//! cannot render pages, so it never produces a screenshot and the headless
//! flag has no effect. Use [`BrowserFetcher`](crate::BrowserFetcher) for
//! OCR.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, instrument, warn};
use url::Url;

use sitesort_shared::{Domain, Result, SitesortError};

use crate::{FetchOptions, FetchedPayload, Fetcher};

/// User-Agent string for regular requests.
const DEFAULT_USER_AGENT: &str = concat!("sitesort/", env!("CARGO_PKG_VERSION"));

/// Desktop Chrome User-Agent sent when anti-detection is on.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

const MAX_REDIRECTS: usize = 10;

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// [`Fetcher`] backed by a shared `reqwest` client.
pub struct HttpFetcher {
    client: Client,
    scheme: &'static str,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_localhost: bool,
}

impl HttpFetcher {
    /// Create a fetcher with a connection-pooling HTTP client.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SitesortError::Fetch(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            scheme: "https",
            allow_localhost: false,
        })
    }

    /// Fetch over plain HTTP from localhost/private IPs (for integration tests).
    #[cfg(test)]
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self.scheme = "http";
        self
    }

    fn target_url(&self, domain: &Domain) -> Result<Url> {
        Url::parse(&format!("{}://{}/", self.scheme, domain))
            .map_err(|e| SitesortError::Fetch(format!("{domain}: invalid URL: {e}")))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip_all, fields(domain = %domain, anti_detection = options.anti_detection))]
    async fn fetch(&self, domain: &Domain, options: &FetchOptions) -> Result<FetchedPayload> {
        let url = self.target_url(domain)?;

        if !self.allow_localhost && is_ssrf_target(&url) {
            warn!(%url, "SSRF protection: blocked");
            return Err(SitesortError::Fetch(format!(
                "{domain}: refusing to fetch private or local address"
            )));
        }

        if options.screenshot {
            debug!("screenshot requested but not supported by the HTTP fetcher");
        }

        let mut request = self.client.get(url.as_str()).timeout(options.timeout);
        if options.anti_detection {
            request = request.headers(browser_headers());
        }

        debug!(%url, "fetching page");
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SitesortError::Fetch(format!("{domain}: timed out after {:?}", options.timeout))
            } else {
                SitesortError::Fetch(format!("{domain}: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SitesortError::Fetch(format!("{domain}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SitesortError::Fetch(format!("{domain}: body read failed: {e}")))?;

        debug!(bytes = body.len(), "page fetched");

        Ok(FetchedPayload {
            html: Some(body),
            screenshot: None,
        })
    }
}

/// Headers a desktop browser sends with a top-level navigation.
fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert("DNT", HeaderValue::from_static("1"));
    headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
    headers
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
pub(crate) fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
            return true;
        }
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
