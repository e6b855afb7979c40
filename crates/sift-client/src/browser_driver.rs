use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use sift_core::error::AppError;
use sift_core::page::PageSnapshot;
use sift_core::traits::PageDriver;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Chromium page driver over the Chrome DevTools Protocol.
///
/// Renders JavaScript, so it sees lazy-loaded lists and infinite scroll. One
/// browser process and one tab back a whole session; the tab is navigated in
/// place and closed together with the browser in [`PageDriver::close`].
///
/// # Example
///
/// ```rust,no_run
/// use sift_client::ChromiumDriver;
/// use sift_core::traits::PageDriver;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let driver = ChromiumDriver::launch(true).await?;
/// driver.open("https://example.com").await?;
/// let snapshot = driver.snapshot().await?;
/// println!("{} bytes, {}px tall", snapshot.html.len(), snapshot.scroll_height);
/// driver.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct ChromiumDriver {
    browser: Mutex<Browser>,
    page: Page,
    handler: JoinHandle<()>,
    timeout: Duration,
}

impl ChromiumDriver {
    /// Launch Chromium with a **30 s** navigation timeout.
    pub async fn launch(headless: bool) -> Result<Self, AppError> {
        Self::launch_with_timeout(headless, Duration::from_secs(30)).await
    }

    pub async fn launch_with_timeout(headless: bool, timeout: Duration) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .disable_default_args()
            .request_timeout(timeout);

        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        if headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        let config = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--no-first-run")
            .window_size(1366, 900)
            .build()
            .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to open tab: {e}")))?;

        Ok(Self {
            browser: Mutex::new(browser),
            page,
            handler,
            timeout,
        })
    }

    async fn eval_number(&self, expression: &str) -> Result<u64, AppError> {
        let value: f64 = self
            .page
            .evaluate(expression)
            .await
            .map_err(|e| AppError::BrowserError(format!("Script failed: {e}")))?
            .into_value()
            .map_err(|e| AppError::BrowserError(format!("Unexpected script result: {e}")))?;
        Ok(value.max(0.0) as u64)
    }
}

impl PageDriver for ChromiumDriver {
    async fn open(&self, url: &str) -> Result<(), AppError> {
        let loaded = tokio::time::timeout(self.timeout, async {
            self.page
                .goto(url)
                .await
                .map_err(|e| AppError::NavigationError(format!("Failed to navigate to {url}: {e}")))?;
            self.page
                .find_element("body")
                .await
                .map_err(|e| AppError::NavigationError(format!("Page did not render body: {e}")))?;
            Ok::<(), AppError>(())
        })
        .await;

        match loaded {
            Ok(inner) => inner,
            Err(_) => Err(AppError::Timeout(self.timeout.as_secs())),
        }
    }

    async fn snapshot(&self) -> Result<PageSnapshot, AppError> {
        let html = self
            .page
            .content()
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to read page content: {e}")))?;
        let url = self
            .page
            .url()
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to read page url: {e}")))?
            .unwrap_or_default();
        let scroll_height = self.eval_number(&height_script(None)).await?;
        let viewport_height = self.eval_number("window.innerHeight").await?;

        Ok(PageSnapshot::new(url, html).with_scroll_metrics(scroll_height, viewport_height))
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), AppError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| AppError::BrowserError(format!("No element matches {selector}: {e}")))?;
        element
            .click()
            .await
            .map_err(|e| AppError::NavigationError(format!("Click on {selector} failed: {e}")))?;

        // In-place (XHR) pagination never navigates; the page signature decides
        // whether anything changed.
        match tokio::time::timeout(timeout, self.page.wait_for_navigation()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(AppError::NavigationError(format!(
                "Navigation after click failed: {e}"
            ))),
            Err(_) => {
                tracing::debug!(selector, "No navigation after click");
                Ok(())
            }
        }
    }

    async fn scroll_to_bottom(&self, container: Option<&str>) -> Result<(), AppError> {
        let script = match container {
            Some(selector) => format!(
                "(() => {{ const el = document.querySelector({}); \
                 if (el) {{ el.scrollTop = el.scrollHeight; }} \
                 else {{ window.scrollTo(0, document.documentElement.scrollHeight); }} \
                 return 0; }})()",
                js_string(selector)
            ),
            None => "(() => { window.scrollTo(0, document.documentElement.scrollHeight); return 0; })()"
                .to_string(),
        };
        self.page
            .evaluate(script.as_str())
            .await
            .map_err(|e| AppError::NavigationError(format!("Scroll failed: {e}")))?;
        Ok(())
    }

    async fn scroll_height(&self, container: Option<&str>) -> Result<u64, AppError> {
        self.eval_number(&height_script(container)).await
    }

    async fn close(&self) -> Result<(), AppError> {
        let mut browser = self.browser.lock().await;
        let closed = browser.close().await;
        self.handler.abort();
        closed
            .map(|_| ())
            .map_err(|e| AppError::BrowserError(format!("Failed to close browser: {e}")))
    }
}

fn height_script(container: Option<&str>) -> String {
    match container {
        Some(selector) => format!(
            "(() => {{ const el = document.querySelector({}); \
             return el ? el.scrollHeight : document.documentElement.scrollHeight; }})()",
            js_string(selector)
        ),
        None => "document.documentElement.scrollHeight".to_string(),
    }
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// Tries to locate the real Chrome/Chromium binary.
///
/// `CHROME_BIN` wins; snap-packaged Chromium is looked up inside the snap
/// because its wrapper strips the headless flags. `None` leaves the lookup to
/// `chromiumoxide`.
fn find_chrome_binary() -> Option<PathBuf> {
    let candidates: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    ];

    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}
