//! Dataset export to CSV or pretty-printed JSON.
//!
//! CSV quotes a value only when it contains the delimiter or opens with a
//! quote, so the output reads back through
//! [`crate::fallback::parse::parse_csv`] unchanged.
//! The Excel format is accepted but written as CSV.

#[cfg(test)]
#[path = "export_test.rs"]
mod tests;

use std::path::Path;

use serde_json::Value;

use crate::dataset::Dataset;
use crate::error::ClientError;
use crate::fallback::parse::{DELIMITER, QUOTE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Excel,
}

impl ExportFormat {
    /// Extension of the file actually written.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv | Self::Excel => "csv",
            Self::Json => "json",
        }
    }

    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Csv | Self::Excel => "text/csv",
            Self::Json => "application/json",
        }
    }
}

/// A rendered export ready to be saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportBlob {
    pub file_name: String,
    pub mime_type: &'static str,
    pub contents: String,
}

/// Render `dataset` in `format` under `base_name` plus the format's extension.
///
/// # Errors
///
/// Returns [`ClientError::Storage`] when JSON serialization fails.
pub fn export(dataset: &Dataset, format: ExportFormat, base_name: &str) -> Result<ExportBlob, ClientError> {
    let contents = match format {
        ExportFormat::Csv => to_csv(dataset),
        ExportFormat::Json => to_json(dataset)?,
        ExportFormat::Excel => {
            tracing::warn!("excel export is not available; writing CSV instead");
            to_csv(dataset)
        }
    };
    Ok(ExportBlob {
        file_name: format!("{base_name}.{}", format.extension()),
        mime_type: format.mime_type(),
        contents,
    })
}

/// Save an export under `dir`, returning the written path.
///
/// # Errors
///
/// Returns [`ClientError::Storage`] when the file cannot be written.
pub fn save(blob: &ExportBlob, dir: &Path) -> Result<std::path::PathBuf, ClientError> {
    let path = dir.join(&blob.file_name);
    std::fs::write(&path, &blob.contents)
        .map_err(|e| ClientError::Storage(format!("write {}: {e}", path.display())))?;
    tracing::info!(path = %path.display(), bytes = blob.contents.len(), "export written");
    Ok(path)
}

#[must_use]
pub fn to_csv(dataset: &Dataset) -> String {
    let mut lines = Vec::with_capacity(dataset.len() + 1);
    lines.push(dataset.columns.iter().map(|c| quote_if_needed(c)).collect::<Vec<_>>().join(","));
    for row in &dataset.rows {
        let cells: Vec<String> = dataset
            .columns
            .iter()
            .map(|column| quote_if_needed(&row.get(column).map(cell_text).unwrap_or_default()))
            .collect();
        lines.push(cells.join(","));
    }
    lines.join("\n")
}

/// # Errors
///
/// Returns [`ClientError::Storage`] when serialization fails.
pub fn to_json(dataset: &Dataset) -> Result<String, ClientError> {
    serde_json::to_string_pretty(&dataset.to_json()).map_err(|e| ClientError::Storage(e.to_string()))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn quote_if_needed(text: &str) -> String {
    // A leading quote would otherwise open a quoted field on read.
    if text.contains(DELIMITER) || text.starts_with(QUOTE) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_owned()
    }
}
