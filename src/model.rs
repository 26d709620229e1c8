//! Request and result types shared by the orchestrator, the HTTP boundary
//! and the local fallback engine.

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;

use std::fmt;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::dataset::{Dataset, Row};

/// Where a schema or a generated dataset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Remote,
    Local,
}

impl Origin {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Local => "local",
        }
    }
}

fn default_field_type() -> String {
    "string".to_owned()
}

/// One column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub constraints: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<Value>,
}

impl FieldSpec {
    #[must_use]
    pub fn new(field_type: &str, description: &str) -> Self {
        Self {
            field_type: field_type.to_owned(),
            description: description.to_owned(),
            constraints: Value::Null,
            examples: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_range(mut self, min: i64, max: i64) -> Self {
        self.constraints = json!({ "min": min, "max": max });
        self
    }

    /// Numeric constraint by key (`min`, `max`).
    #[must_use]
    pub fn constraint_f64(&self, key: &str) -> Option<f64> {
        self.constraints.get(key).and_then(Value::as_f64)
    }
}

/// Ordered field-name → spec mapping. Serializes as a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<(String, FieldSpec)>,
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, spec: FieldSpec) {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = spec;
        } else {
            self.fields.push((name, spec));
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(n, s)| (n.as_str(), s))
    }

    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|(n, _)| n.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, spec) in &self.fields {
            map.serialize_entry(name, spec)?;
        }
        map.end()
    }
}

/// Reads fields in document order; a repeated name keeps its first position.
struct SchemaVisitor;

impl<'de> Visitor<'de> for SchemaVisitor {
    type Value = Schema;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an object of field specs")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Schema, A::Error> {
        let mut schema = Schema::new();
        while let Some((name, spec)) = access.next_entry::<String, FieldSpec>()? {
            schema.insert(name, spec);
        }
        Ok(schema)
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(SchemaVisitor)
    }
}

/// Result of schema inference, remote or local.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaResult {
    pub schema: Schema,
    #[serde(default)]
    pub detected_domain: String,
    #[serde(default)]
    pub estimated_rows: u64,
    #[serde(default)]
    pub relationships: Vec<Value>,
    #[serde(default)]
    pub suggestions: Vec<Value>,
    #[serde(default)]
    pub sample_data: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub row_count: u32,
    pub quality_level: String,
    pub privacy_level: String,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { row_count: 1000, quality_level: "high".to_owned(), privacy_level: "maximum".to_owned() }
    }
}

/// What the user supplied to seed generation.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    Description(String),
    Uploaded(Dataset),
}

/// One generation request, consumed once by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub domain: String,
    pub data_type: String,
    pub source: DataSource,
    pub params: GenerationParams,
}

impl GenerationRequest {
    #[must_use]
    pub fn description(&self) -> &str {
        match &self.source {
            DataSource::Description(text) => text,
            DataSource::Uploaded(_) => "",
        }
    }

    /// JSON body for `POST /generation/start`.
    #[must_use]
    pub fn start_body(&self, schema: &Schema) -> Value {
        let source_data = match &self.source {
            DataSource::Uploaded(dataset) => dataset.to_json(),
            DataSource::Description(_) => Value::Array(Vec::new()),
        };
        json!({
            "schema": schema,
            "config": {
                "rowCount": self.params.row_count,
                "domain": self.domain,
                "data_type": self.data_type,
                "quality_level": self.params.quality_level,
                "privacy_level": self.params.privacy_level,
            },
            "description": self.description(),
            "source_data": source_data,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub quality_score: f64,
    pub privacy_score: f64,
    pub bias_score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub job_id: Option<String>,
    pub data: Dataset,
    pub scores: QualityScores,
    pub origin: Origin,
    pub metadata: Value,
}

impl GenerationResult {
    /// Read a result payload returned by the backend.
    ///
    /// Scores may sit at the top level or under `metadata`; rows under
    /// `data` or `synthetic_data`. Returns `None` when no rows are present,
    /// which means the call only started a job.
    #[must_use]
    pub fn from_remote(value: &Value) -> Option<Self> {
        let rows = value
            .get("data")
            .or_else(|| value.get("synthetic_data"))
            .and_then(Value::as_array)?;
        let metadata = value.get("metadata").cloned().unwrap_or(Value::Null);
        let score = |key: &str| {
            value
                .get(key)
                .or_else(|| metadata.get(key))
                .and_then(Value::as_f64)
                .unwrap_or_default()
        };
        Some(Self {
            job_id: value.get("job_id").and_then(Value::as_str).map(str::to_owned),
            data: Dataset::from_json_rows(rows),
            scores: QualityScores {
                quality_score: score("quality_score"),
                privacy_score: score("privacy_score"),
                bias_score: score("bias_score"),
            },
            origin: Origin::Remote,
            metadata,
        })
    }
}
