use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

pub const DEFAULT_MAX_PAGINATION: u32 = 200;
pub const DEFAULT_IMAGE_CONCURRENCY: usize = 6;
pub const DEFAULT_IMAGE_DIR: &str = "scraped_images";

/// On-disk layout of the persisted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// One workbook, one worksheet per sheet.
    #[default]
    Xlsx,
    /// One directory, one CSV file per sheet.
    Csv,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "xlsx" => Ok(ExportFormat::Xlsx),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(format!("Unknown export format: {}", s)),
        }
    }
}

/// Immutable input of one scrape session, supplied by the shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub target_url: String,
    /// Workbook file name (or directory name for CSV output).
    pub output_name: String,
    pub output_dir: PathBuf,
    pub format: ExportFormat,
    pub headless: bool,
    /// Hard cap on pagination clicks plus scroll cycles.
    pub max_pagination: u32,
    pub image_concurrency: usize,
    pub validate_images: bool,
    pub download_images: bool,
    pub image_dir: PathBuf,
}

impl SessionConfig {
    pub fn new(target_url: impl Into<String>, output_name: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            output_name: output_name.into(),
            output_dir: PathBuf::from("."),
            format: ExportFormat::default(),
            headless: false,
            max_pagination: DEFAULT_MAX_PAGINATION,
            image_concurrency: DEFAULT_IMAGE_CONCURRENCY,
            validate_images: true,
            download_images: true,
            image_dir: PathBuf::from(DEFAULT_IMAGE_DIR),
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_format(mut self, format: ExportFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_max_pagination(mut self, max: u32) -> Self {
        self.max_pagination = max;
        self
    }

    pub fn with_image_concurrency(mut self, n: usize) -> Self {
        self.image_concurrency = n;
        self
    }

    pub fn with_image_validation(mut self, enabled: bool) -> Self {
        self.validate_images = enabled;
        self
    }

    pub fn with_image_download(mut self, enabled: bool) -> Self {
        self.download_images = enabled;
        self
    }

    pub fn with_image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_dir = dir.into();
        self
    }

    /// Downloading implies validation: a body is only fetched for a valid probe.
    pub fn images_enabled(&self) -> bool {
        self.validate_images || self.download_images
    }

    /// Reject configurations the session could not honour.
    pub fn validate(&self) -> Result<Url, AppError> {
        let url = Url::parse(self.target_url.trim())
            .map_err(|e| AppError::InvalidConfig(format!("Invalid target URL: {e}")))?;
        match url.scheme() {
            "http" | "https" | "file" => {}
            scheme => {
                return Err(AppError::InvalidConfig(format!(
                    "URL scheme '{scheme}' is not supported (http, https, file)"
                )));
            }
        }
        if self.output_name.trim().is_empty() {
            return Err(AppError::InvalidConfig("Output name is empty".into()));
        }
        if self.image_concurrency == 0 {
            return Err(AppError::InvalidConfig(
                "Image concurrency must be at least 1".into(),
            ));
        }
        Ok(url)
    }

    /// Final path of the persisted artifact.
    ///
    /// Mirrors the desktop tool: a bare name gets the format's extension.
    pub fn output_path(&self) -> PathBuf {
        let name = self.output_name.trim();
        let has_ext = Path::new(name)
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case(self.format.as_str()));
        match (self.format, has_ext) {
            (_, true) => self.output_dir.join(name),
            (ExportFormat::Xlsx, false) => self.output_dir.join(format!("{name}.xlsx")),
            (ExportFormat::Csv, false) => self.output_dir.join(name),
        }
    }
}

/// Thresholds used by the structure detector.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Data rows of consistent width a table needs to qualify.
    pub min_table_rows: usize,
    /// Repetitions of a sibling signature a list needs to qualify.
    pub min_list_items: usize,
    /// Minimum text length of a list item.
    pub min_item_text: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_table_rows: 2,
            min_list_items: 3,
            min_item_text: 2,
        }
    }
}

/// Timeouts and heuristics of the control loop.
#[derive(Debug, Clone)]
pub struct ScrapeTuning {
    pub navigation_timeout: Duration,
    pub scroll_settle: Duration,
    pub scroll_poll: Duration,
    pub retry_backoff: Duration,
    /// Consecutive scroll cycles without growth before giving up.
    pub stagnant_scroll_limit: u32,
    pub image_timeout: Duration,
    /// Field names never part of a fingerprint.
    pub volatile_fields: Vec<String>,
    pub detection: DetectionConfig,
}

impl Default for ScrapeTuning {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            scroll_settle: Duration::from_secs(2),
            scroll_poll: Duration::from_millis(250),
            retry_backoff: Duration::from_millis(500),
            stagnant_scroll_limit: 3,
            image_timeout: Duration::from_secs(12),
            volatile_fields: vec!["row_state".into(), "highlighted".into(), "selected".into()],
            detection: DetectionConfig::default(),
        }
    }
}

impl ScrapeTuning {
    pub fn with_scroll_settle(mut self, settle: Duration, poll: Duration) -> Self {
        self.scroll_settle = settle;
        self.scroll_poll = poll;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }
}
