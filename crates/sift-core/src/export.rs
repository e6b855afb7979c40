//! Sheet accumulation and durable checkpoints.
//!
//! Every checkpoint rewrites the whole artifact into a temporary file in the
//! destination directory and renames it over the previous one, so a reader
//! (or a crash) only ever sees a complete earlier or a complete later state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Format, Workbook, XlsxError};
use tempfile::NamedTempFile;

use crate::config::ExportFormat;
use crate::error::AppError;
use crate::models::{CanonicalRecord, IMAGE_LOCAL, IMAGE_STATUS, ImageCell, ImageTask, SERIAL_NO, SourceKey};

/// Longest string a worksheet cell accepts.
const MAX_CELL_CHARS: usize = 32_767;
const MAX_SHEET_NAME: usize = 31;
const STATUS_MISSING: &str = "missing";

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// Workbook file (xlsx) or target directory (csv).
    pub path: PathBuf,
    pub image_status: bool,
    pub image_local: bool,
}

/// One output sheet: ordered records sharing a growing column set.
#[derive(Debug, Clone)]
pub struct ExportSheet {
    name: String,
    source: SourceKey,
    /// Content columns in first-seen order.
    columns: Vec<String>,
    records: Vec<CanonicalRecord>,
}

impl ExportSheet {
    fn new(name: String, source: SourceKey) -> Self {
        Self {
            name,
            source,
            columns: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> SourceKey {
        self.source
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[CanonicalRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn push(&mut self, record: CanonicalRecord) {
        for (name, _) in &record.fields {
            if !self.columns.contains(name) {
                self.columns.push(name.clone());
            }
        }
        self.records.push(record);
    }

    fn header(&self, options: &ExportOptions) -> Vec<String> {
        let mut header = Vec::with_capacity(self.columns.len() + 3);
        header.push(SERIAL_NO.to_string());
        header.extend(self.columns.iter().cloned());
        if options.image_status {
            header.push(IMAGE_STATUS.to_string());
        }
        if options.image_local {
            header.push(IMAGE_LOCAL.to_string());
        }
        header
    }

    /// Row values after `serial_no`, aligned with [`Self::header`].
    fn row(&self, record: &CanonicalRecord, options: &ExportOptions) -> Vec<String> {
        let mut row: Vec<String> = self
            .columns
            .iter()
            .map(|c| record.field(c).unwrap_or_default().to_string())
            .collect();
        if options.image_status {
            row.push(
                record
                    .image
                    .as_ref()
                    .map(|cell| cell.status.as_str())
                    .unwrap_or(STATUS_MISSING)
                    .to_string(),
            );
        }
        if options.image_local {
            row.push(
                record
                    .image
                    .as_ref()
                    .and_then(|cell| cell.local_path.as_ref())
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            );
        }
        row
    }
}

/// Owner of all sheets; the only writer of the output artifact.
#[derive(Debug)]
pub struct ExportManager {
    options: ExportOptions,
    sheets: Vec<ExportSheet>,
    by_source: HashMap<SourceKey, usize>,
    checkpoints: u32,
    closed: bool,
}

impl ExportManager {
    pub fn new(options: ExportOptions) -> Self {
        Self {
            options,
            sheets: Vec::new(),
            by_source: HashMap::new(),
            checkpoints: 0,
            closed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.options.path
    }

    pub fn sheets(&self) -> &[ExportSheet] {
        &self.sheets
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    pub fn total_records(&self) -> usize {
        self.sheets.iter().map(ExportSheet::len).sum()
    }

    pub fn checkpoints(&self) -> u32 {
        self.checkpoints
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append an admitted record to its source's sheet, creating the sheet
    /// on first use.
    pub fn append(&mut self, record: CanonicalRecord) -> Result<(), AppError> {
        if self.closed {
            return Err(AppError::ExportClosed);
        }
        let idx = match self.by_source.get(&record.source) {
            Some(idx) => *idx,
            None => {
                let name = self.unique_sheet_name(&record.source.sheet_name());
                self.sheets.push(ExportSheet::new(name, record.source));
                self.by_source.insert(record.source, self.sheets.len() - 1);
                self.sheets.len() - 1
            }
        };
        self.sheets[idx].push(record);
        Ok(())
    }

    /// Set the image cell of the task's owning record. Returns `false` if no
    /// such record exists.
    pub fn apply_image_outcome(&mut self, task: &ImageTask) -> Result<bool, AppError> {
        if self.closed {
            return Err(AppError::ExportClosed);
        }
        let Some(idx) = self.by_source.get(&task.source) else {
            return Ok(false);
        };
        let records = &mut self.sheets[*idx].records;
        // Records within a sheet are in ascending serial order.
        let Ok(pos) = records.binary_search_by_key(&task.serial_no, |r| r.serial_no) else {
            return Ok(false);
        };
        records[pos].image = Some(ImageCell {
            status: task.status,
            local_path: task.local_path.clone(),
        });
        Ok(true)
    }

    /// Durably write everything appended so far.
    pub fn checkpoint(&mut self) -> Result<PathBuf, AppError> {
        if self.closed {
            return Err(AppError::ExportClosed);
        }
        match self.options.format {
            ExportFormat::Xlsx => self.write_workbook()?,
            ExportFormat::Csv => self.write_csv_dir()?,
        }
        self.checkpoints += 1;
        tracing::debug!(
            path = %self.options.path.display(),
            records = self.total_records(),
            sheets = self.sheets.len(),
            "Checkpoint written"
        );
        Ok(self.options.path.clone())
    }

    /// Final checkpoint; afterwards every mutation fails with
    /// [`AppError::ExportClosed`].
    pub fn finalize(&mut self) -> Result<PathBuf, AppError> {
        let path = self.checkpoint()?;
        self.closed = true;
        Ok(path)
    }

    /// One-line account of what is held in memory, for failure reports.
    pub fn describe(&self) -> String {
        if self.sheets.is_empty() {
            return "no records in memory".to_string();
        }
        let parts: Vec<String> = self
            .sheets
            .iter()
            .map(|s| format!("{}={} rows", s.name, s.len()))
            .collect();
        format!("{} records in memory ({})", self.total_records(), parts.join(", "))
    }

    fn unique_sheet_name(&self, wanted: &str) -> String {
        let base = sanitize_sheet_name(wanted);
        let taken = |name: &str| self.sheets.iter().any(|s| s.name.eq_ignore_ascii_case(name));
        if !taken(&base) {
            return base;
        }
        (2..)
            .map(|n| {
                let suffix = format!("_{n}");
                let keep = MAX_SHEET_NAME - suffix.len();
                format!("{}{suffix}", base.chars().take(keep).collect::<String>())
            })
            .find(|candidate| !taken(candidate))
            .unwrap_or(base)
    }

    fn write_workbook(&self) -> Result<(), AppError> {
        let path = &self.options.path;
        let dir = parent_dir(path);
        std::fs::create_dir_all(&dir)?;

        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();
        for sheet in &self.sheets {
            let ws = workbook.add_worksheet();
            ws.set_name(&sheet.name).map_err(xlsx_err)?;
            for (col, title) in sheet.header(&self.options).iter().enumerate() {
                ws.write_string_with_format(0, col as u16, title, &bold)
                    .map_err(xlsx_err)?;
            }
            ws.set_freeze_panes(1, 0).map_err(xlsx_err)?;
            for (i, record) in sheet.records.iter().enumerate() {
                let row = (i + 1) as u32;
                ws.write_number(row, 0, record.serial_no as f64)
                    .map_err(xlsx_err)?;
                for (col, value) in sheet.row(record, &self.options).iter().enumerate() {
                    if value.is_empty() {
                        continue;
                    }
                    ws.write_string(row, (col + 1) as u16, clip(value))
                        .map_err(xlsx_err)?;
                }
            }
        }
        if self.sheets.is_empty() {
            workbook.add_worksheet();
        }

        let tmp = NamedTempFile::new_in(&dir)?;
        workbook.save(tmp.path()).map_err(xlsx_err)?;
        tmp.persist(path)
            .map_err(|e| AppError::ExportError(format!("{}: {}", path.display(), e.error)))?;
        Ok(())
    }

    fn write_csv_dir(&self) -> Result<(), AppError> {
        let dir = &self.options.path;
        std::fs::create_dir_all(dir)?;
        for sheet in &self.sheets {
            let target = dir.join(format!("{}.csv", sheet.name));
            let mut tmp = NamedTempFile::new_in(dir)?;
            {
                let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
                writer.write_record(sheet.header(&self.options)).map_err(csv_err)?;
                for record in &sheet.records {
                    let mut row = vec![record.serial_no.to_string()];
                    row.extend(sheet.row(record, &self.options));
                    writer.write_record(&row).map_err(csv_err)?;
                }
                writer.flush()?;
            }
            tmp.as_file_mut().sync_all()?;
            tmp.persist(&target).map_err(|e| {
                AppError::ExportError(format!("{}: {}", target.display(), e.error))
            })?;
        }
        Ok(())
    }
}

/// Worksheet-safe name: at most 31 chars, none of `[]:*?/\`, no edge quotes.
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            c => c,
        })
        .collect();
    let trimmed: String = cleaned
        .trim()
        .trim_matches('\'')
        .chars()
        .take(MAX_SHEET_NAME)
        .collect();
    if trimmed.is_empty() {
        "Sheet".to_string()
    } else {
        trimmed
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn clip(value: &str) -> &str {
    match value.char_indices().nth(MAX_CELL_CHARS) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

fn xlsx_err(e: XlsxError) -> AppError {
    AppError::ExportError(e.to_string())
}

fn csv_err(e: csv::Error) -> AppError {
    AppError::ExportError(e.to_string())
}
