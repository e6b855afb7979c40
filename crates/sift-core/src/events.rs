use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::detect::VerdictKind;
use crate::error::AppError;
use crate::models::ImageStatus;
use crate::navigation::TerminationReason;
use crate::session::SessionSummary;

/// Category tag carried by every shell-facing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Navigation,
    Extraction,
    Detection,
    Scroll,
    Image,
    Stop,
    Save,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Navigation => "navigation",
            EventCategory::Extraction => "extraction",
            EventCategory::Detection => "detection",
            EventCategory::Scroll => "scroll",
            EventCategory::Image => "image",
            EventCategory::Stop => "stop",
            EventCategory::Save => "save",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events emitted by a session, in order.
#[derive(Debug, Clone)]
pub enum SessionEvent<'a> {
    Started {
        session_id: Uuid,
        url: &'a str,
    },
    PageLoaded {
        url: &'a str,
    },
    Detected {
        page: u32,
        kind: VerdictKind,
        tables: usize,
        lists: usize,
        pagination: bool,
        scroll: bool,
    },
    Extracted {
        page: u32,
        admitted: usize,
        duplicates: usize,
        total: usize,
    },
    Paginating {
        attempt: u32,
        label: &'a str,
    },
    Scrolled {
        attempt: u32,
        grew: bool,
        height: u64,
    },
    NavigationFailed {
        error: &'a str,
    },
    ImageChecked {
        serial_no: u64,
        url: &'a str,
        status: ImageStatus,
    },
    StopRequested,
    Terminated {
        reason: TerminationReason,
    },
    Checkpointed {
        path: &'a Path,
        records: usize,
    },
    SaveFailed {
        error: &'a str,
        in_memory: &'a str,
    },
}

impl SessionEvent<'_> {
    pub fn category(&self) -> EventCategory {
        match self {
            SessionEvent::Started { .. }
            | SessionEvent::PageLoaded { .. }
            | SessionEvent::Paginating { .. }
            | SessionEvent::NavigationFailed { .. }
            | SessionEvent::Terminated { .. } => EventCategory::Navigation,
            SessionEvent::Detected { .. } => EventCategory::Detection,
            SessionEvent::Extracted { .. } => EventCategory::Extraction,
            SessionEvent::Scrolled { .. } => EventCategory::Scroll,
            SessionEvent::ImageChecked { .. } => EventCategory::Image,
            SessionEvent::StopRequested => EventCategory::Stop,
            SessionEvent::Checkpointed { .. } | SessionEvent::SaveFailed { .. } => EventCategory::Save,
        }
    }

    /// Human-readable line for the shell and the log file.
    pub fn message(&self) -> String {
        match self {
            SessionEvent::Started { session_id, url } => {
                format!("Session {session_id} started: {url}")
            }
            SessionEvent::PageLoaded { url } => format!("Loaded {url}"),
            SessionEvent::Detected {
                page,
                kind,
                tables,
                lists,
                pagination,
                scroll,
            } => {
                let mut msg = format!("Page {page}: {kind} content ({tables} table(s), {lists} list(s))");
                if *pagination {
                    msg.push_str(", pagination found");
                }
                if *scroll {
                    msg.push_str(", scrollable");
                }
                msg
            }
            SessionEvent::Extracted {
                page,
                admitted,
                duplicates,
                total,
            } => format!(
                "Page {page}: {admitted} new record(s), {duplicates} duplicate(s), {total} total"
            ),
            SessionEvent::Paginating { attempt, label } => {
                format!("Clicking next page ({attempt}): '{label}'")
            }
            SessionEvent::Scrolled {
                attempt,
                grew,
                height,
            } => {
                if *grew {
                    format!("Scroll {attempt}: page grew to {height}px")
                } else {
                    format!("Scroll {attempt}: no new content (height {height}px)")
                }
            }
            SessionEvent::NavigationFailed { error } => format!("Navigation failed: {error}"),
            SessionEvent::ImageChecked {
                serial_no,
                url,
                status,
            } => format!("Image for record {serial_no} {status}: {url}"),
            SessionEvent::StopRequested => {
                "Stop requested; finishing the current page".to_string()
            }
            SessionEvent::Terminated { reason } => format!("Finished navigating: {reason}"),
            SessionEvent::Checkpointed { path, records } => {
                format!("Saved {records} record(s) to {}", path.display())
            }
            SessionEvent::SaveFailed { error, in_memory } => {
                format!("Saving failed: {error}; {in_memory}")
            }
        }
    }
}

/// Trait for receiving session events (decoupled logging).
pub trait SessionReporter: Send + Sync {
    fn report(&self, event: SessionEvent<'_>) {
        let _ = event;
    }

    /// Called exactly once, after the session has saved or failed.
    fn complete(&self, summary: &SessionSummary) {
        let _ = summary;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl SessionReporter for TracingReporter {
    fn report(&self, event: SessionEvent<'_>) {
        match event {
            SessionEvent::Started { session_id, url } => {
                tracing::info!(%session_id, %url, "Session started");
            }
            SessionEvent::PageLoaded { url } => {
                tracing::info!(%url, "Page loaded");
            }
            SessionEvent::Detected {
                page,
                kind,
                tables,
                lists,
                pagination,
                scroll,
            } => {
                tracing::info!(page, %kind, tables, lists, pagination, scroll, "Structure detected");
            }
            SessionEvent::Extracted {
                page,
                admitted,
                duplicates,
                total,
            } => {
                tracing::info!(page, admitted, duplicates, total, "Records extracted");
            }
            SessionEvent::Paginating { attempt, label } => {
                tracing::info!(attempt, %label, "Paginating");
            }
            SessionEvent::Scrolled {
                attempt,
                grew,
                height,
            } => {
                tracing::info!(attempt, grew, height, "Scrolled");
            }
            SessionEvent::NavigationFailed { error } => {
                tracing::warn!(%error, "Navigation failed");
            }
            SessionEvent::ImageChecked {
                serial_no,
                url,
                status,
            } => {
                tracing::debug!(serial_no, %url, %status, "Image checked");
            }
            SessionEvent::StopRequested => {
                tracing::info!("Stop requested");
            }
            SessionEvent::Terminated { reason } => {
                tracing::info!(%reason, "Navigation finished");
            }
            SessionEvent::Checkpointed { path, records } => {
                tracing::info!(path = %path.display(), records, "Checkpoint saved");
            }
            SessionEvent::SaveFailed { error, in_memory } => {
                tracing::error!(%error, %in_memory, "Saving failed");
            }
        }
    }

    fn complete(&self, summary: &SessionSummary) {
        tracing::info!(
            session_id = %summary.session_id,
            status = %summary.status,
            records = summary.total_records,
            output = ?summary.output_path,
            "Session complete"
        );
    }
}

/// Owned event as delivered to a shell over a channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShellEvent {
    Event {
        at: DateTime<Utc>,
        category: EventCategory,
        message: String,
    },
    Finished(SessionSummary),
}

/// Forwards events to a shell task.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<ShellEvent>,
}

impl ChannelReporter {
    pub fn new(tx: mpsc::UnboundedSender<ShellEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ShellEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl SessionReporter for ChannelReporter {
    fn report(&self, event: SessionEvent<'_>) {
        // A shell that stopped listening is not the session's problem.
        let _ = self.tx.send(ShellEvent::Event {
            at: Utc::now(),
            category: event.category(),
            message: event.message(),
        });
    }

    fn complete(&self, summary: &SessionSummary) {
        let _ = self.tx.send(ShellEvent::Finished(summary.clone()));
    }
}

/// Append-only session log: one timestamped line per event.
#[derive(Debug)]
pub struct LogFileReporter {
    path: PathBuf,
    file: Mutex<File>,
}

impl LogFileReporter {
    /// Open `sift_<YYYYMMDD_HHMMSS>.log` in `dir`, named after `started_at`.
    pub fn create(dir: &Path, started_at: DateTime<Local>) -> Result<Self, AppError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("sift_{}.log", started_at.format("%Y%m%d_%H%M%S")));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&self, category: EventCategory, message: &str) {
        let line = format!(
            "{} [{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            category,
            message
        );
        let Ok(mut file) = self.file.lock() else {
            return;
        };
        if let Err(e) = file.write_all(line.as_bytes()) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write log line");
        }
    }
}

impl SessionReporter for LogFileReporter {
    fn report(&self, event: SessionEvent<'_>) {
        self.write_line(event.category(), &event.message());
    }

    fn complete(&self, summary: &SessionSummary) {
        self.write_line(EventCategory::Save, &summary.to_string());
    }
}

/// Fan events out to two reporters, left first.
impl<A: SessionReporter, B: SessionReporter> SessionReporter for (A, B) {
    fn report(&self, event: SessionEvent<'_>) {
        self.0.report(event.clone());
        self.1.report(event);
    }

    fn complete(&self, summary: &SessionSummary) {
        self.0.complete(summary);
        self.1.complete(summary);
    }
}
