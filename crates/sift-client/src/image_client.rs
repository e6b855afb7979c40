use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, RANGE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use sift_core::error::AppError;
use sift_core::traits::{ImageBody, ImageClient, ImageProbe};

/// Image validator/fetcher using reqwest.
///
/// Probes with `HEAD`; servers that reject `HEAD` get a one-byte ranged
/// `GET` instead. Clones share one connection pool.
#[derive(Clone)]
pub struct ReqwestImageClient {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestImageClient {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(12))
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
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, AppError> {
        request
            .send()
            .await
            .map_err(|e| crate::map_send_error(e, self.timeout_secs))
    }
}

impl ImageClient for ReqwestImageClient {
    async fn probe(&self, url: &str) -> Result<ImageProbe, AppError> {
        let mut response = self.send(self.client.head(url)).await?;
        if rejects_head(response.status()) {
            tracing::debug!(url, status = response.status().as_u16(), "HEAD rejected, probing with ranged GET");
            response = self
                .send(self.client.get(url).header(RANGE, "bytes=0-0"))
                .await?;
        }

        Ok(ImageProbe {
            status: response.status().as_u16(),
            content_type: content_type(response.headers()),
        })
    }

    async fn download(&self, url: &str) -> Result<ImageBody, AppError> {
        let response = self.send(self.client.get(url)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        let content_type = content_type(response.headers());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::ImageError(format!("Failed to read image body: {e}")))?;

        Ok(ImageBody {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

fn rejects_head(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED | StatusCode::FORBIDDEN
    )
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
