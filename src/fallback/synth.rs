//! Field-value synthesis.
//!
//! DESIGN
//! ======
//! A value is a function of (field name, description, declared type, row
//! index). Resolution order:
//!
//! 1. `examples` on the field, cycled by row index
//! 2. name rules, in fixed order (substrings of the field name first, then
//!    whole words of the description)
//! 3. declared type
//! 4. a labeled placeholder
//!
//! Name-matched categories rotate by index so repeated calls agree. Only
//! amounts and prices draw from the RNG, inside fixed bounds.

#[cfg(test)]
#[path = "synth_test.rs"]
mod tests;

use rand::Rng;
use serde_json::{Number, Value, json};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::schema::is_keyword_form;
use crate::dataset::{Dataset, Row};
use crate::model::{FieldSpec, Schema};

const NAMES: &[&str] = &[
    "Alice Johnson",
    "Bob Smith",
    "Carol Davis",
    "David Wilson",
    "Emma Brown",
    "Frank Miller",
    "Grace Lee",
    "Henry Taylor",
];
const DIAGNOSES: &[&str] = &["Hypertension", "Type 2 Diabetes", "Asthma", "Migraine", "Osteoarthritis", "Influenza"];
const PRODUCTS: &[&str] = &["Wireless Headphones", "Coffee Maker", "Running Shoes", "Desk Lamp", "Backpack", "Smart Watch"];
const CATEGORIES: &[&str] = &["Electronics", "Home", "Sports", "Clothing", "Books"];
const STREETS: &[&str] = &["Main St", "Oak Ave", "Maple Dr", "Cedar Ln", "Elm St"];

/// Price bounds in cents: `[50.00, 550.00)`.
const PRICE_CENTS: std::ops::Range<u32> = 5_000..55_000;
/// Amount/balance bounds in cents: `[10.00, 5000.00)`.
const AMOUNT_CENTS: std::ops::Range<u32> = 1_000..500_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameRule {
    Patient,
    Name,
    Age,
    Diagnosis,
    Amount,
    Account,
    Product,
    Price,
    Category,
    Email,
    Phone,
    Address,
}

const NAME_RULES: &[(&[&str], NameRule)] = &[
    (&["patient"], NameRule::Patient),
    (&["name"], NameRule::Name),
    (&["age"], NameRule::Age),
    (&["diagnosis"], NameRule::Diagnosis),
    (&["amount", "balance"], NameRule::Amount),
    (&["account"], NameRule::Account),
    (&["product"], NameRule::Product),
    (&["price"], NameRule::Price),
    (&["category"], NameRule::Category),
    (&["email"], NameRule::Email),
    (&["phone"], NameRule::Phone),
    (&["address"], NameRule::Address),
];

/// Synthesize one value for `field` at row `index`.
#[must_use]
pub fn synthesize_value(name: &str, field: &FieldSpec, index: usize) -> Value {
    if !field.examples.is_empty() {
        return field.examples[index % field.examples.len()].clone();
    }
    if let Some(rule) = match_rule(name).or_else(|| match_description_rule(&field.description)) {
        return apply_rule(rule, index);
    }
    by_type(name, field, index)
}

/// Synthesize `count` rows covering every schema field.
#[must_use]
pub fn synthesize_rows(schema: &Schema, count: usize) -> Dataset {
    let rows = (0..count)
        .map(|i| {
            schema
                .iter()
                .map(|(name, spec)| (name.to_owned(), synthesize_value(name, spec, i)))
                .collect::<Row>()
        })
        .collect();
    Dataset::new(schema.field_names(), rows)
}

fn match_rule(text: &str) -> Option<NameRule> {
    let lower = text.to_lowercase();
    NAME_RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lower.contains(n)))
        .map(|(_, rule)| *rule)
}

/// Prose only matches whole words, so "Average" is not an age.
fn match_description_rule(text: &str) -> Option<NameRule> {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).collect();
    NAME_RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| words.iter().any(|w| is_keyword_form(w, n))))
        .map(|(_, rule)| *rule)
}

fn cycle(values: &[&str], index: usize) -> Value {
    Value::String(values[index % values.len()].to_owned())
}

fn cents_to_string(cents: u32) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

fn apply_rule(rule: NameRule, index: usize) -> Value {
    match rule {
        NameRule::Patient => Value::String(format!("PT{}", 1000 + index)),
        NameRule::Name => cycle(NAMES, index),
        NameRule::Age => json!(18 + (index * 7) % 63),
        NameRule::Diagnosis => cycle(DIAGNOSES, index),
        NameRule::Amount => {
            let cents = rand::rng().random_range(AMOUNT_CENTS);
            Number::from_f64(f64::from(cents) / 100.0).map_or(Value::Null, Value::Number)
        }
        NameRule::Account => Value::String(format!("ACC{}", 100_000 + index)),
        NameRule::Product => cycle(PRODUCTS, index),
        NameRule::Price => Value::String(cents_to_string(rand::rng().random_range(PRICE_CENTS))),
        NameRule::Category => cycle(CATEGORIES, index),
        NameRule::Email => email(index),
        NameRule::Phone => phone(index),
        NameRule::Address => Value::String(format!("{} {}", 100 + index, STREETS[index % STREETS.len()])),
    }
}

fn email(index: usize) -> Value {
    Value::String(format!("user{}@example.com", index + 1))
}

fn phone(index: usize) -> Value {
    Value::String(format!("+1-555-{:04}", (1000 + index) % 10_000))
}

fn by_type(name: &str, field: &FieldSpec, index: usize) -> Value {
    match field.field_type.to_lowercase().as_str() {
        "string" | "text" => {
            let label = if field.description.is_empty() { name } else { &field.description };
            Value::String(format!("sample_{}_{}", slug(label), index + 1))
        }
        "number" | "integer" | "int" | "float" | "decimal" => stepped_number(field, index),
        "boolean" | "bool" => Value::Bool(index % 2 == 0),
        "date" => Value::String(day_offset(index).date().to_string()),
        "datetime" | "timestamp" => {
            let at = day_offset(index);
            Value::String(at.format(&Rfc3339).unwrap_or_else(|_| at.date().to_string()))
        }
        "email" => email(index),
        "phone" => phone(index),
        "id" | "uuid" => Value::String(Uuid::new_v4().to_string()),
        other => Value::String(format!("{}_{}_{}", slug(name), slug(other), index + 1)),
    }
}

/// `min + step * (index % 10)` across the field's range, ten steps wide.
fn stepped_number(field: &FieldSpec, index: usize) -> Value {
    let min = field.constraint_f64("min").unwrap_or(1.0);
    let max = field.constraint_f64("max").unwrap_or(100.0);
    #[allow(clippy::cast_precision_loss)]
    let step = (index % 10) as f64;
    let value = min + step * (max - min) / 10.0;
    if value.fract() == 0.0 && field.field_type != "float" && field.field_type != "decimal" {
        #[allow(clippy::cast_possible_truncation)]
        return json!(value as i64);
    }
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

/// One year ago plus 30 days per row, wrapping after ten years of rows.
fn day_offset(index: usize) -> OffsetDateTime {
    let days = i64::try_from(index % 120).unwrap_or_default() * 30;
    OffsetDateTime::now_utc() - Duration::days(365) + Duration::days(days)
}

fn slug(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}
