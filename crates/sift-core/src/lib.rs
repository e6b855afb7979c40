pub mod config;
pub mod dedup;
pub mod detect;
pub mod error;
pub mod events;
pub mod export;
pub mod extract;
pub mod images;
pub mod models;
pub mod navigation;
pub mod page;
pub mod session;
pub mod traits;

#[cfg(test)]
mod scenarios;

pub use config::{ExportFormat, ScrapeTuning, SessionConfig};
pub use error::AppError;
pub use events::{ChannelReporter, LogFileReporter, SessionEvent, SessionReporter, ShellEvent, TracingReporter};
pub use models::{CanonicalRecord, RawRecord, SourceKey, compute_hash};
pub use page::PageSnapshot;
pub use session::{CompletionStatus, ScrapeSession, SessionHandle, SessionState, SessionSummary};
pub use traits::{ImageBody, ImageClient, ImageProbe, NoImages, PageDriver};
