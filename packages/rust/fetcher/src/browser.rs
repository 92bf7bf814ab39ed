//! Headless (or headful) Chrome fetcher.
//!
//! Renders `https://<domain>/` in a real browser, strips cookie banners and
//! returns the rendered HTML plus a full-page PNG screenshot for OCR. One
//! browser process is launched lazily per window mode and reused for every
//! page of the run.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use url::Url;

use sitesort_shared::{Domain, Result, SitesortError};

use crate::http::is_ssrf_target;
use crate::{FetchOptions, FetchedPayload, Fetcher};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const HIDE_AUTOMATION: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
"#;

const REMOVE_COOKIE_BANNERS: &str = r#"
document.querySelectorAll('[id*=cookie], [class*=cookie], [aria-label*=cookie]')
    .forEach(el => el.remove());
"#;

const REMOVE_OVERLAYS: &str = r#"
[
    '[id*="consent"]', '[class*="consent"]', '[aria-label*="consent"]',
    '[id*="banner"]', '[class*="banner"]', '[id*="modal"]', '[class*="modal"]',
    '[id*="overlay"]', '[class*="overlay"]', '[id*="popup"]', '[class*="popup"]',
    '[id*="gdpr"]', '[class*="gdpr"]'
].forEach(selector => {
    document.querySelectorAll(selector).forEach(el => {
        const style = window.getComputedStyle(el);
        const rect = el.getBoundingClientRect();
        if (style.position === 'fixed' || style.position === 'absolute'
            || style.zIndex > 1000 || rect.width > window.innerWidth * 0.8) {
            el.remove();
        }
    });
});
"#;

/// Time given to the page to settle after navigation.
fn settle_delay(anti_detection: bool) -> Duration {
    if anti_detection {
        Duration::from_secs(3)
    } else {
        Duration::from_secs(1)
    }
}

// ---------------------------------------------------------------------------
// BrowserFetcher
// ---------------------------------------------------------------------------

/// [`Fetcher`] backed by a Chrome instance driven over CDP.
#[derive(Default)]
pub struct BrowserFetcher {
    headless: OnceCell<Browser>,
    headful: OnceCell<Browser>,
}

impl BrowserFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    async fn browser(&self, headless: bool) -> Result<&Browser> {
        let cell = if headless {
            &self.headless
        } else {
            &self.headful
        };
        cell.get_or_try_init(|| launch(headless)).await
    }
}

async fn launch(headless: bool) -> Result<Browser> {
    let mut builder = BrowserConfig::builder()
        .no_sandbox()
        .window_size(1920, 1080)
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-blink-features=AutomationControlled");
    if !headless {
        builder = builder.with_head();
    }
    let config = builder
        .build()
        .map_err(|e| SitesortError::Fetch(format!("invalid browser config: {e}")))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| SitesortError::Fetch(format!("browser launch failed: {e}")))?;

    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
    });

    info!(headless, "browser launched");
    Ok(browser)
}

#[async_trait]
impl Fetcher for BrowserFetcher {
    #[instrument(skip_all, fields(domain = %domain, headless = options.headless))]
    async fn fetch(&self, domain: &Domain, options: &FetchOptions) -> Result<FetchedPayload> {
        let url = Url::parse(&format!("https://{domain}/"))
            .map_err(|e| SitesortError::Fetch(format!("{domain}: invalid URL: {e}")))?;
        if is_ssrf_target(&url) {
            warn!(%url, "SSRF protection: blocked");
            return Err(SitesortError::Fetch(format!(
                "{domain}: refusing to fetch private or local address"
            )));
        }

        let browser = self.browser(options.headless).await?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| SitesortError::Fetch(format!("{domain}: cannot open tab: {e}")))?;

        let visited = tokio::time::timeout(options.timeout, visit(&page, &url, options))
            .await
            .map_err(|_| {
                SitesortError::Fetch(format!("{domain}: timed out after {:?}", options.timeout))
            })
            .and_then(|r| r.map_err(|e| SitesortError::Fetch(format!("{domain}: {e}"))));

        if let Err(e) = page.close().await {
            debug!(error = %e, "failed to close tab");
        }
        visited
    }
}

/// Navigate, clean up the page and capture its content.
async fn visit(
    page: &Page,
    url: &Url,
    options: &FetchOptions,
) -> std::result::Result<FetchedPayload, chromiumoxide::error::CdpError> {
    if options.anti_detection {
        page.set_user_agent(BROWSER_USER_AGENT).await?;
        page.evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(
            HIDE_AUTOMATION,
        ))
        .await?;
    }

    debug!(%url, "navigating");
    page.goto(url.as_str()).await?;
    tokio::time::sleep(settle_delay(options.anti_detection)).await;

    page.evaluate(REMOVE_COOKIE_BANNERS).await?;
    if options.anti_detection {
        page.evaluate(REMOVE_OVERLAYS).await?;
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let html = page.content().await?;
    let screenshot = if options.screenshot {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        Some(page.screenshot(params).await?)
    } else {
        None
    };

    debug!(
        bytes = html.len(),
        screenshot = screenshot.as_ref().map_or(0, Vec::len),
        "page rendered"
    );
    Ok(FetchedPayload {
        html: Some(html),
        screenshot,
    })
}
