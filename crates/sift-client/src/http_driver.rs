use std::time::Duration;

use reqwest::Client;
use scraper::{Html, Selector};
use sift_core::error::AppError;
use sift_core::page::{PageSnapshot, resolve_url};
use sift_core::traits::PageDriver;
use tokio::sync::Mutex;
use url::Url;

/// Static-HTML page driver using reqwest.
///
/// No JavaScript runs, so there is nothing to scroll: snapshots carry no
/// scroll metrics and the detector never offers a scroll affordance. A
/// pagination "click" resolves the control's `href` against the current page
/// and loads it. `file://` targets are read from disk, which keeps local
/// fixtures and saved pages scrapeable without a browser.
pub struct HttpPageDriver {
    client: Client,
    timeout_secs: u64,
    current: Mutex<Option<LoadedPage>>,
}

#[derive(Debug, Clone)]
struct LoadedPage {
    url: String,
    html: String,
}

impl HttpPageDriver {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
            current: Mutex::new(None),
        })
    }

    async fn load(&self, url: &str) -> Result<LoadedPage, AppError> {
        let parsed =
            Url::parse(url).map_err(|e| AppError::NavigationError(format!("Invalid URL {url}: {e}")))?;

        if parsed.scheme() == "file" {
            let path = parsed
                .to_file_path()
                .map_err(|_| AppError::NavigationError(format!("Not a local path: {url}")))?;
            let html = tokio::fs::read_to_string(&path).await?;
            return Ok(LoadedPage {
                url: parsed.to_string(),
                html,
            });
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| crate::map_send_error(e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        let final_url = response.url().to_string();
        let html = response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))?;

        Ok(LoadedPage {
            url: final_url,
            html,
        })
    }
}

impl PageDriver for HttpPageDriver {
    async fn open(&self, url: &str) -> Result<(), AppError> {
        let page = self.load(url).await?;
        tracing::debug!(url = %page.url, bytes = page.html.len(), "Fetched page");
        *self.current.lock().await = Some(page);
        Ok(())
    }

    async fn snapshot(&self) -> Result<PageSnapshot, AppError> {
        let current = self.current.lock().await;
        let page = current
            .as_ref()
            .ok_or_else(|| AppError::BrowserError("No page loaded".into()))?;
        Ok(PageSnapshot::new(page.url.clone(), page.html.clone()))
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> Result<(), AppError> {
        let target = {
            let current = self.current.lock().await;
            let page = current
                .as_ref()
                .ok_or_else(|| AppError::BrowserError("No page loaded".into()))?;
            control_target(page, selector)?
        };
        let page = self.load(&target).await?;
        tracing::debug!(url = %page.url, "Followed pagination link");
        *self.current.lock().await = Some(page);
        Ok(())
    }

    async fn scroll_to_bottom(&self, _container: Option<&str>) -> Result<(), AppError> {
        Ok(())
    }

    async fn scroll_height(&self, _container: Option<&str>) -> Result<u64, AppError> {
        Ok(0)
    }

    async fn close(&self) -> Result<(), AppError> {
        self.current.lock().await.take();
        Ok(())
    }
}

/// Absolute address the control at `selector` links to.
fn control_target(page: &LoadedPage, selector: &str) -> Result<String, AppError> {
    let parsed = Selector::parse(selector)
        .map_err(|e| AppError::BrowserError(format!("Invalid selector {selector}: {e}")))?;
    let document = Html::parse_document(&page.html);
    let element = document
        .select(&parsed)
        .next()
        .ok_or_else(|| AppError::BrowserError(format!("No element matches {selector}")))?;

    let href = element
        .value()
        .attr("href")
        .or_else(|| {
            // A button wrapped in a link, or a link wrapping the matched span.
            element
                .ancestors()
                .filter_map(scraper::ElementRef::wrap)
                .find_map(|a| a.value().attr("href"))
        })
        .ok_or_else(|| {
            AppError::BrowserError(format!(
                "Control {selector} has no link to follow without a browser"
            ))
        })?;

    let base = Url::parse(&page.url).ok();
    resolve_url(base.as_ref(), href).ok_or_else(|| {
        AppError::BrowserError(format!("Control {selector} links to unusable address {href}"))
    })
}
