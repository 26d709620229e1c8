//! Uploaded file parsing (CSV and JSON).
//!
//! The format is chosen from the file extension before any content is read;
//! spreadsheet formats are rejected outright.

#[cfg(test)]
#[path = "parse_test.rs"]
mod tests;

use serde_json::{Number, Value};

use crate::dataset::{Dataset, Row};
use crate::error::{ClientError, ParseError};

pub const DELIMITER: char = ',';
pub const QUOTE: char = '"';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    Csv,
    Json,
}

impl UploadFormat {
    /// Pick a parser from the file name.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Unsupported`] for any extension other than
    /// `.csv` or `.json` (including `.xlsx`).
    pub fn from_file_name(file_name: &str) -> Result<Self, ClientError> {
        let extension = file_name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("csv") => Ok(Self::Csv),
            Some("json") => Ok(Self::Json),
            _ => Err(ClientError::Unsupported { file_name: file_name.to_owned() }),
        }
    }
}

/// Parse an uploaded file into rows.
///
/// # Errors
///
/// Returns [`ClientError::Unsupported`] for unknown extensions and
/// [`ClientError::Parse`] naming the violated constraint otherwise.
pub fn parse_upload(file_name: &str, contents: &str) -> Result<Dataset, ClientError> {
    let dataset = match UploadFormat::from_file_name(file_name)? {
        UploadFormat::Csv => parse_csv(contents)?,
        UploadFormat::Json => parse_json(contents)?,
    };
    tracing::info!(file_name, rows = dataset.len(), columns = dataset.columns.len(), "parsed upload");
    Ok(dataset)
}

/// Parse comma-separated text with a header line.
///
/// Fields may be wrapped in double quotes to contain the delimiter; a
/// doubled quote inside a quoted field is a literal quote. Blank lines are
/// skipped. Cell text is coerced with [`coerce_value`].
///
/// # Errors
///
/// See [`ParseError`].
pub fn parse_csv(text: &str) -> Result<Dataset, ParseError> {
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim_end_matches('\r')))
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();
    if lines.len() < 2 {
        return Err(ParseError::TooFewLines);
    }

    let (header_line_no, header_line) = lines[0];
    let raw_headers = split_line(header_line, header_line_no)?;
    if raw_headers.iter().all(|h| h.trim().is_empty()) {
        return Err(ParseError::EmptyHeaders);
    }
    let columns: Vec<String> = raw_headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let h = h.trim();
            if h.is_empty() { format!("column_{}", i + 1) } else { h.to_owned() }
        })
        .collect();

    let mut rows = Vec::new();
    for &(line_no, line) in &lines[1..] {
        let cells = split_line(line, line_no)?;
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let row: Row = columns
            .iter()
            .enumerate()
            .map(|(i, column)| (column.clone(), cells.get(i).map_or(Value::Null, |c| coerce_value(c))))
            .collect();
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(ParseError::NoDataRows);
    }
    Ok(Dataset::new(columns, rows))
}

/// Parse a JSON document: an array of records, or one record object.
///
/// # Errors
///
/// [`ParseError::InvalidJson`] for malformed text,
/// [`ParseError::InvalidJsonShape`] for any other top-level value, and
/// [`ParseError::NoDataRows`] when the array holds no records.
pub fn parse_json(text: &str) -> Result<Dataset, ParseError> {
    let value: Value = serde_json::from_str(text).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    let dataset = match value {
        Value::Array(items) => {
            let skipped = items.iter().filter(|v| !v.is_object()).count();
            if skipped > 0 {
                tracing::warn!(skipped, "ignoring non-object elements in JSON upload");
            }
            Dataset::from_json_rows(&items)
        }
        Value::Object(record) => Dataset::from_rows(vec![record]),
        _ => return Err(ParseError::InvalidJsonShape),
    };
    if dataset.is_empty() {
        return Err(ParseError::NoDataRows);
    }
    Ok(dataset)
}

/// Coerce one cell: numbers, `true`/`false` (any case), empty → `Null`.
#[must_use]
pub fn coerce_value(raw: &str) -> Value {
    let text = raw.trim();
    if text.is_empty() {
        return Value::Null;
    }
    if text.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(n) = text.parse::<i64>() {
        return Value::Number(n.into());
    }
    if looks_numeric(text) {
        if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }
    Value::String(text.to_owned())
}

/// Rejects `inf`, `NaN` and friends that `f64::from_str` would accept.
fn looks_numeric(text: &str) -> bool {
    text.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        && text.chars().any(|c| c.is_ascii_digit())
}

fn split_line(line: &str, line_no: usize) -> Result<Vec<String>, ParseError> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut at_field_start = true;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == QUOTE {
                if chars.peek() == Some(&QUOTE) {
                    current.push(QUOTE);
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else if c == DELIMITER {
            fields.push(std::mem::take(&mut current));
            at_field_start = true;
            continue;
        } else if c == QUOTE && at_field_start {
            in_quotes = true;
        } else {
            current.push(c);
        }
        at_field_start = false;
    }
    if in_quotes {
        return Err(ParseError::UnbalancedQuote { line: line_no });
    }
    fields.push(current);
    Ok(fields)
}
