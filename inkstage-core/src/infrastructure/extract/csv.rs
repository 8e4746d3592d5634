// inkstage-core/src/infrastructure/extract/csv.rs

use chrono::{DateTime, NaiveDate, Utc};
use duckdb::Connection;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

use crate::domain::batch::{RecordBatch, Value};
use crate::error::StageError;
use crate::infrastructure::error::InfrastructureError;

/// What was read, for the run log and `run_results.json`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExtractMetadata {
    pub file_name: String,
    pub total_rows: usize,
    pub columns: Vec<String>,
    pub extract_timestamp: DateTime<Utc>,
    pub file_size_bytes: u64,
}

/// Flat-file reader. DuckDB does the CSV dialect sniffing; typing is ours.
#[derive(Debug, Clone)]
pub struct CsvExtractor {
    date_formats: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ColumnKind {
    Int,
    Float,
    Date,
    Text,
}

impl CsvExtractor {
    pub fn new(date_formats: Vec<String>) -> Self {
        Self { date_formats }
    }

    pub fn extract(&self, path: &Path) -> Result<(RecordBatch, ExtractMetadata), StageError> {
        if !path.is_file() {
            return Err(InfrastructureError::SourceNotFound(path.display().to_string()).into());
        }
        let file_size_bytes = std::fs::metadata(path)?.len();

        let (columns, raw) = read_as_text(path).map_err(InfrastructureError::from)?;
        debug!(file = %path.display(), columns = columns.len(), "CSV read as text");

        let kinds: Vec<ColumnKind> = (0..columns.len())
            .map(|idx| self.infer_kind(raw.iter().map(|row| row[idx].as_deref())))
            .collect();

        let rows = raw
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(&kinds)
                    .map(|(cell, kind)| self.convert(cell, *kind))
                    .collect()
            })
            .collect();

        let batch = RecordBatch::new(columns.clone(), rows)?;
        let metadata = ExtractMetadata {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            total_rows: batch.len(),
            columns,
            extract_timestamp: Utc::now(),
            file_size_bytes,
        };

        info!(
            file = %metadata.file_name,
            rows = metadata.total_rows,
            "Extracted {} rows from {}",
            metadata.total_rows,
            metadata.file_name
        );
        Ok((batch, metadata))
    }

    /// Narrowest kind that fits every non-empty cell. Int widens to Float;
    /// any other disagreement falls back to Text.
    fn infer_kind<'a>(&self, cells: impl Iterator<Item = Option<&'a str>>) -> ColumnKind {
        let mut kind: Option<ColumnKind> = None;
        for cell in cells.flatten().map(str::trim).filter(|c| !c.is_empty()) {
            let this = self.cell_kind(cell);
            kind = Some(match (kind, this) {
                (None, k) => k,
                (Some(current), k) if current == k => current,
                (Some(ColumnKind::Int), ColumnKind::Float)
                | (Some(ColumnKind::Float), ColumnKind::Int) => ColumnKind::Float,
                _ => return ColumnKind::Text,
            });
        }
        kind.unwrap_or(ColumnKind::Text)
    }

    fn cell_kind(&self, cell: &str) -> ColumnKind {
        if cell.parse::<i64>().is_ok() {
            ColumnKind::Int
        } else if is_float(cell) {
            ColumnKind::Float
        } else if parse_date(cell, &self.date_formats).is_some() {
            ColumnKind::Date
        } else {
            ColumnKind::Text
        }
    }

    fn convert(&self, cell: Option<String>, kind: ColumnKind) -> Value {
        let Some(raw) = cell else {
            return Value::Null;
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        match kind {
            ColumnKind::Int => trimmed.parse().map(Value::Int).unwrap_or(Value::Text(raw)),
            ColumnKind::Float => trimmed.parse().map(Value::Float).unwrap_or(Value::Text(raw)),
            ColumnKind::Date => parse_date(trimmed, &self.date_formats)
                .map(Value::Date)
                .unwrap_or(Value::Text(raw)),
            ColumnKind::Text => Value::Text(raw),
        }
    }
}

fn is_float(cell: &str) -> bool {
    cell.parse::<f64>().is_ok_and(f64::is_finite)
}

/// First format that parses the whole text wins.
pub fn parse_date(text: &str, formats: &[String]) -> Option<NaiveDate> {
    let text = text.trim();
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

type TextRows = Vec<Vec<Option<String>>>;

fn read_as_text(path: &Path) -> Result<(Vec<String>, TextRows), duckdb::Error> {
    let conn = Connection::open_in_memory()?;
    let source = format!(
        "read_csv_auto('{}', all_varchar = true, header = true)",
        path.display().to_string().replace('\'', "''")
    );

    let mut describe = conn.prepare(&format!("DESCRIBE SELECT * FROM {}", source))?;
    let columns = describe
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(&format!("SELECT * FROM {}", source))?;
    let width = columns.len();
    let rows = stmt
        .query_map([], |row| {
            (0..width)
                .map(|idx| row.get::<_, Option<String>>(idx))
                .collect::<Result<Vec<_>, _>>()
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((columns, rows))
}
