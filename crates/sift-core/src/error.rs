use thiserror::Error;

/// Application-wide error types for sift.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (page fetch or image request).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A bounded wait expired.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Page load, pagination click or scroll did not complete.
    #[error("Navigation error: {0}")]
    NavigationError(String),

    /// The browser-automation collaborator failed outside of navigation.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// Session configuration rejected before start.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Writing the output artifact failed.
    #[error("Export error: {0}")]
    ExportError(String),

    /// Mutation attempted after the export was finalized.
    #[error("Export already finalized")]
    ExportClosed,

    /// Image probe or download failed.
    #[error("Image error: {0}")]
    ImageError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true for the transient-navigation class: worth exactly one retry.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::NavigationError(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if this error must end the session as `Failed`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::ExportError(_) | AppError::ExportClosed | AppError::Io(_)
        )
    }
}
