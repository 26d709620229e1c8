//! Tabular rows shared by parsing, synthesis, export and the HTTP boundary.

use serde_json::{Map, Value};

/// One record: column name → JSON value.
pub type Row = Map<String, Value>;

static NULL: Value = Value::Null;

/// Rows plus the column order they were read or generated in.
///
/// `Row` is an ordered map keyed alphabetically, so column order is carried
/// separately for export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Dataset {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Build from rows alone; columns appear in first-seen order.
    #[must_use]
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, rows }
    }

    /// Accept a JSON array of objects; non-object elements are skipped.
    #[must_use]
    pub fn from_json_rows(values: &[Value]) -> Self {
        let rows = values.iter().filter_map(Value::as_object).cloned().collect();
        Self::from_rows(rows)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, `Null` where a row lacks it.
    pub fn column<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows.iter().map(move |row| row.get(name).unwrap_or(&NULL))
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Array(self.rows.iter().cloned().map(Value::Object).collect())
    }
}
