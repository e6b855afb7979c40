#[cfg(feature = "browser")]
pub mod browser_driver;
pub mod http_driver;
pub mod image_client;

#[cfg(feature = "browser")]
pub use browser_driver::ChromiumDriver;
pub use http_driver::HttpPageDriver;
pub use image_client::ReqwestImageClient;

use sift_core::error::AppError;

pub(crate) const USER_AGENT: &str = concat!("sift/", env!("CARGO_PKG_VERSION"));

pub(crate) fn map_send_error(e: reqwest::Error, timeout_secs: u64) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout_secs)
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed: {e}"))
    } else {
        AppError::HttpError(e.to_string())
    }
}
