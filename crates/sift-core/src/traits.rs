use std::future::Future;
use std::time::Duration;

use crate::error::AppError;
use crate::page::PageSnapshot;

/// Uniform query/command surface over a browser-automation collaborator.
///
/// The detector, extractor and navigation controller only ever see
/// [`PageSnapshot`]s; everything stateful lives behind this trait so the
/// pipeline can run against a synthetic in-memory page.
pub trait PageDriver: Send + Sync {
    /// Load `url` and wait until the document is ready.
    fn open(&self, url: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Capture the currently rendered page.
    fn snapshot(&self) -> impl Future<Output = Result<PageSnapshot, AppError>> + Send;

    /// Click the element addressed by `selector` and wait (up to `timeout`)
    /// for the resulting navigation or network-idle condition.
    fn click(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Scroll the window, or `container` when given, to its bottom.
    fn scroll_to_bottom(
        &self,
        container: Option<&str>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Current scroll height of the window or `container`.
    fn scroll_height(
        &self,
        container: Option<&str>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Release the page. Called once when the session ends.
    fn close(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Result of a lightweight existence/content-type check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageProbe {
    pub status: u16,
    pub content_type: Option<String>,
}

impl ImageProbe {
    /// 2xx with an `image/*` content type.
    pub fn is_image(&self) -> bool {
        (200..300).contains(&self.status)
            && self
                .content_type
                .as_deref()
                .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"))
    }
}

/// A downloaded image body.
#[derive(Debug, Clone)]
pub struct ImageBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Network access used by the image pool.
pub trait ImageClient: Send + Sync + Clone + 'static {
    fn probe(&self, url: &str) -> impl Future<Output = Result<ImageProbe, AppError>> + Send;

    fn download(&self, url: &str) -> impl Future<Output = Result<ImageBody, AppError>> + Send;
}

/// An image client for sessions with image handling disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoImages;

impl ImageClient for NoImages {
    async fn probe(&self, url: &str) -> Result<ImageProbe, AppError> {
        Err(AppError::ImageError(format!("image checks disabled: {url}")))
    }

    async fn download(&self, url: &str) -> Result<ImageBody, AppError> {
        Err(AppError::ImageError(format!("image downloads disabled: {url}")))
    }
}
