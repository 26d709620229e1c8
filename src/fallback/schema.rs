//! Local schema inference, from a description or from uploaded rows.

#[cfg(test)]
#[path = "schema_test.rs"]
mod tests;

use serde_json::Value;

use super::synth::synthesize_rows;
use crate::dataset::Dataset;
use crate::model::{FieldSpec, Schema, SchemaResult};

pub const ESTIMATED_ROWS: u64 = 10_000;
pub const SAMPLE_ROWS: usize = 5;

/// Fields added when the description mentions a keyword, unless a field
/// whose name already contains the keyword exists.
const KEYWORD_FIELDS: &[(&str, &str, &str)] = &[
    ("email", "email", "Email address"),
    ("phone", "phone", "Phone number"),
    ("address", "string", "Street address"),
    ("age", "number", "Age in years"),
    ("price", "number", "Unit price"),
    ("amount", "number", "Monetary amount"),
    ("name", "string", "Full name"),
    ("date", "date", "Calendar date"),
    ("category", "string", "Category label"),
];

const DOMAIN_KEYWORDS: &[(&str, &[&str])] = &[
    ("healthcare", &["patient", "medical", "diagnosis", "hospital", "clinical", "health"]),
    ("finance", &["bank", "transaction", "account", "payment", "loan", "finance"]),
    ("retail", &["product", "customer", "order", "store", "inventory", "retail"]),
];

/// Build a schema from a natural-language description.
///
/// `id` and `created_at` always lead, followed by the domain's core fields
/// and any fields named by description keywords.
#[must_use]
pub fn schema_from_description(description: &str, domain: &str) -> SchemaResult {
    let detected = if domain.trim().is_empty() { detect_domain(description) } else { domain.trim() };

    let mut schema = Schema::new();
    schema.insert("id", FieldSpec::new("uuid", "Unique identifier"));
    schema.insert("created_at", FieldSpec::new("datetime", "Creation timestamp"));
    for (name, spec) in domain_fields(detected) {
        schema.insert(name, spec);
    }

    let words = words(description);
    for (keyword, field_type, label) in KEYWORD_FIELDS {
        let mentioned = words.iter().any(|w| is_keyword_form(w, keyword));
        let covered = schema.iter().any(|(name, _)| name.contains(keyword));
        if mentioned && !covered {
            let spec = if *keyword == "age" {
                FieldSpec::new(field_type, label).with_range(0, 120)
            } else {
                FieldSpec::new(field_type, label)
            };
            schema.insert(*keyword, spec);
        }
    }

    let sample = synthesize_rows(&schema, SAMPLE_ROWS);
    tracing::info!(domain = detected, fields = schema.len(), "built local schema from description");
    SchemaResult {
        schema,
        detected_domain: detected.to_owned(),
        estimated_rows: ESTIMATED_ROWS,
        relationships: vec![Value::String("Basic entity relationships".to_owned())],
        suggestions: vec![Value::String("Connect the AI backend for richer schema generation".to_owned())],
        sample_data: sample.rows,
    }
}

/// Guess a domain from description keywords; `"general"` when none match.
#[must_use]
pub fn detect_domain(description: &str) -> &'static str {
    let lower = description.to_lowercase();
    DOMAIN_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map_or("general", |(domain, _)| *domain)
}

/// Infer a column type for every column of an uploaded dataset.
#[must_use]
pub fn infer_schema(dataset: &Dataset) -> Schema {
    let mut schema = Schema::new();
    for column in &dataset.columns {
        let field_type = infer_type(dataset.column(column));
        schema.insert(column.clone(), FieldSpec::new(field_type, &format!("Inferred from uploaded column {column}")));
    }
    schema
}

/// Wrap an inferred schema in a result the orchestrator can treat like a
/// remote answer.
#[must_use]
pub fn schema_from_upload(dataset: &Dataset, domain: &str) -> SchemaResult {
    let schema = infer_schema(dataset);
    SchemaResult {
        schema,
        detected_domain: if domain.is_empty() { "general".to_owned() } else { domain.to_owned() },
        estimated_rows: u64::try_from(dataset.len()).unwrap_or(u64::MAX),
        relationships: Vec::new(),
        suggestions: Vec::new(),
        sample_data: dataset.rows.iter().take(SAMPLE_ROWS).cloned().collect(),
    }
}

fn domain_fields(domain: &str) -> Vec<(&'static str, FieldSpec)> {
    match domain {
        "healthcare" => vec![
            ("patient_id", FieldSpec::new("string", "Patient identifier")),
            ("age", FieldSpec::new("number", "Patient age").with_range(0, 120)),
            ("diagnosis", FieldSpec::new("string", "Medical diagnosis")),
        ],
        "finance" => vec![
            ("account_id", FieldSpec::new("string", "Account identifier")),
            ("amount", FieldSpec::new("number", "Transaction amount")),
            ("transaction_type", FieldSpec::new("string", "Transaction type")),
        ],
        "retail" => vec![
            ("product_name", FieldSpec::new("string", "Product name")),
            ("price", FieldSpec::new("number", "Product price")),
            ("category", FieldSpec::new("string", "Product category")),
        ],
        _ => vec![
            ("name", FieldSpec::new("string", "Entity name")),
            ("value", FieldSpec::new("number", "Numeric value")),
            ("status", FieldSpec::new("string", "Status field")),
        ],
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Exact word or its plural (`ages`, `categories`).
pub(super) fn is_keyword_form(word: &str, keyword: &str) -> bool {
    if word == keyword || word.strip_suffix('s') == Some(keyword) || word.strip_suffix("es") == Some(keyword) {
        return true;
    }
    keyword
        .strip_suffix('y')
        .is_some_and(|stem| word.strip_suffix("ies") == Some(stem))
}

fn infer_type<'a>(values: impl Iterator<Item = &'a Value>) -> &'static str {
    let present: Vec<&Value> = values.filter(|v| !v.is_null()).collect();
    if present.is_empty() {
        return "string";
    }
    if present.iter().all(|v| v.is_number()) {
        return "number";
    }
    if present.iter().all(|v| v.is_boolean()) {
        return "boolean";
    }
    let strings: Option<Vec<&str>> = present.iter().map(|v| v.as_str()).collect();
    let Some(strings) = strings else {
        return "string";
    };
    if strings.iter().all(|s| looks_like_email(s)) {
        "email"
    } else if strings.iter().all(|s| looks_like_date(s)) {
        "date"
    } else {
        "string"
    }
}

fn looks_like_email(s: &str) -> bool {
    s.split_once('@').is_some_and(|(user, host)| !user.is_empty() && host.contains('.') && !s.contains(' '))
}

/// `YYYY-MM-DD`, optionally followed by a time part.
fn looks_like_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 10
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit)
}
