//! Participant sources.
//!
//! A source yields ordered raw rows plus the header names it saw. The first
//! row of a CSV file is its header; data row `i` is sheet row `i + 2`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::records::{has_required_columns, normalize_all, ParticipantRecord, RawRow};
use crate::validation::{RowViolation, Validator};

/// Valid records shown by [`inspect`].
pub const PREVIEW_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Participant source not found: {0}")]
    NotFound(PathBuf),

    #[error("Participant source {path} is unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Participant source {0} has no rows")]
    Empty(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

pub trait RowSource: Send + Sync {
    /// Human-readable origin, for logs and errors.
    fn describe(&self) -> String;

    /// All rows, in source order. Zero rows is an error.
    fn read(&self) -> Result<SourceTable, SourceError>;
}

/// Comma-separated file with a header row.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RowSource for CsvSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self) -> Result<SourceTable, SourceError> {
        if !self.path.is_file() {
            return Err(SourceError::NotFound(self.path.clone()));
        }
        let unreadable = |source| SourceError::Unreadable {
            path: self.path.clone(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .map_err(unreadable)?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(unreadable)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = vec![];
        for record in reader.records() {
            let record = record.map_err(unreadable)?;
            let row: RawRow = headers
                .iter()
                .zip(record.iter())
                .filter(|(header, value)| !header.is_empty() && !value.trim().is_empty())
                .collect();
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(SourceError::Empty(self.describe()));
        }
        info!(path = %self.path.display(), rows = rows.len(), "participant source read");
        Ok(SourceTable { headers, rows })
    }
}

impl RowSource for Vec<RawRow> {
    fn describe(&self) -> String {
        "in-memory rows".to_string()
    }

    fn read(&self) -> Result<SourceTable, SourceError> {
        if self.is_empty() {
            return Err(SourceError::Empty(self.describe()));
        }
        let headers: BTreeSet<&str> = self.iter().flat_map(RawRow::columns).collect();
        Ok(SourceTable {
            headers: headers.into_iter().map(str::to_string).collect(),
            rows: self.clone(),
        })
    }
}

/// Preview of a source before a batch is started.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInspection {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub invalid_rows: usize,
    pub has_required_columns: bool,
    pub errors: Vec<RowViolation>,
    pub preview: Vec<ParticipantRecord>,
}

pub fn inspect(source: &dyn RowSource, default_event: &str) -> Result<SourceInspection, SourceError> {
    let table = source.read()?;
    let records = normalize_all(&table.rows, default_event);
    let validation = Validator::new().validate_batch(&records);

    Ok(SourceInspection {
        total_rows: records.len(),
        valid_rows: validation.valid_records.len(),
        invalid_rows: validation.errors.len(),
        has_required_columns: has_required_columns(&table.headers),
        errors: validation.errors,
        preview: validation.valid_records.into_iter().take(PREVIEW_LIMIT).collect(),
    })
}
