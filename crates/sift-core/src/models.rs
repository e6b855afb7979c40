use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Reserved column holding the session-wide ordinal.
pub const SERIAL_NO: &str = "serial_no";
/// Reserved field for the first link found in a row/item.
pub const LINK: &str = "link";
/// Reserved field for the first image found in a row/item.
pub const IMAGE_URL: &str = "image_url";
pub const IMAGE_STATUS: &str = "image_status";
pub const IMAGE_LOCAL: &str = "image_local";

/// Column names content fields may never take.
pub const RESERVED_FIELDS: &[&str] = &[SERIAL_NO, LINK, IMAGE_URL, IMAGE_STATUS, IMAGE_LOCAL];

/// Shape of the container a record was pulled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Table,
    List,
}

/// Identifies the container (and therefore the sheet) a record belongs to.
///
/// `ordinal` is the container's position among containers of the same kind
/// on the page, so the second table of every page feeds the same sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceKey {
    pub kind: ContainerKind,
    pub ordinal: usize,
}

impl SourceKey {
    pub fn table(ordinal: usize) -> Self {
        Self {
            kind: ContainerKind::Table,
            ordinal,
        }
    }

    pub fn list(ordinal: usize) -> Self {
        Self {
            kind: ContainerKind::List,
            ordinal,
        }
    }

    /// Worksheet name: `Table`, `Table_2`, `Items`, `Items_2`, ...
    pub fn sheet_name(&self) -> String {
        let base = match self.kind {
            ContainerKind::Table => "Table",
            ContainerKind::List => "Items",
        };
        if self.ordinal == 0 {
            base.to_string()
        } else {
            format!("{base}_{}", self.ordinal + 1)
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sheet_name())
    }
}

/// One record straight out of the extractor, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub source: SourceKey,
    /// Content fields in document order.
    pub fields: Vec<(String, String)>,
    pub link: Option<String>,
    pub image_url: Option<String>,
}

impl RawRecord {
    pub fn new(source: SourceKey) -> Self {
        Self {
            source,
            fields: Vec::new(),
            link: None,
            image_url: None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Terminal (or pending) state of an image check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Pending,
    Valid,
    Invalid,
    Downloaded,
    Failed,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::Pending => "pending",
            ImageStatus::Valid => "valid",
            ImageStatus::Invalid => "invalid",
            ImageStatus::Downloaded => "downloaded",
            ImageStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ImageStatus::Pending)
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Image enrichment attached to an admitted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCell {
    pub status: ImageStatus,
    pub local_path: Option<PathBuf>,
}

/// A normalized, admitted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRecord {
    pub serial_no: u64,
    pub source: SourceKey,
    /// Display values (original case), `link`/`image_url` appended last.
    pub fields: Vec<(String, String)>,
    /// SHA-256 over the canonical field values.
    pub fingerprint: String,
    /// `None` when the record carries no image reference.
    pub image: Option<ImageCell>,
}

impl CanonicalRecord {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn image_url(&self) -> Option<&str> {
        self.field(IMAGE_URL).filter(|u| !u.is_empty())
    }
}

/// One unit of work for the image pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTask {
    pub serial_no: u64,
    pub source: SourceKey,
    pub url: String,
    pub status: ImageStatus,
    pub local_path: Option<PathBuf>,
}

impl ImageTask {
    pub fn new(serial_no: u64, source: SourceKey, url: impl Into<String>) -> Self {
        Self {
            serial_no,
            source,
            url: url.into(),
            status: ImageStatus::Pending,
            local_path: None,
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
