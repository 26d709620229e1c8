//! Local generation pipeline.
//!
//! DESIGN
//! ======
//! Mirrors the backend's agent stages so the event log reads the same
//! whether the remote or the local engine produced the data:
//!
//! | progress | stage |
//! |---|---|
//! | 10 / 20 | schema analysis |
//! | 30 / 40 | privacy scoring |
//! | 50 / 60 | bias scoring |
//! | 65 / 70 | relationship mapping |
//! | 75 | row synthesis |
//! | 90 / 95 | quality scoring |
//! | 100 | done |
//!
//! Scoring is heuristic. When a heuristic has nothing to measure it returns
//! the backend's default score for that stage.

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod tests;

use std::collections::HashMap;

use serde_json::{Value, json};

use super::schema::{infer_schema, schema_from_description};
use super::synth::synthesize_rows;
use crate::dataset::Dataset;
use crate::model::{DataSource, GenerationRequest, GenerationResult, Origin, QualityScores, Schema};
use crate::net::message::ProgressUpdate;

pub const DEFAULT_PRIVACY_SCORE: f64 = 85.0;
pub const DEFAULT_BIAS_SCORE: f64 = 88.0;
pub const DEFAULT_QUALITY_SCORE: f64 = 92.0;

const PII_MARKERS: &[&str] = &["email", "phone", "address", "name", "ssn", "patient", "birth", "account"];
/// Columns with more distinct values than this are not treated as categorical.
const MAX_CATEGORIES: usize = 20;
/// Rows synthesized to score bias when there is no uploaded source.
const BIAS_SAMPLE_ROWS: usize = 100;

/// Run every stage locally and return a complete result.
///
/// `schema` is reused when already resolved; otherwise it is inferred from
/// the request's source. Each checkpoint is reported through `progress`.
pub fn run_local_pipeline(
    request: &GenerationRequest,
    schema: Option<&Schema>,
    mut progress: impl FnMut(ProgressUpdate),
) -> GenerationResult {
    let mut report = |pct: i32, step: &str, message: &str| {
        progress(ProgressUpdate::new(None, Some(pct), message).with_step(step));
    };

    report(10, "schema", "🏠 Starting local schema analysis...");
    let schema = match (schema, &request.source) {
        (Some(schema), _) if !schema.is_empty() => schema.clone(),
        (_, DataSource::Uploaded(dataset)) => infer_schema(dataset),
        (_, DataSource::Description(text)) => schema_from_description(text, &request.domain).schema,
    };
    report(20, "schema", "🏠 Local schema analysis complete");

    report(30, "privacy", "🏠 Assessing privacy requirements locally...");
    let privacy_score = privacy_score(&schema, &request.params.privacy_level);
    report(40, "privacy", "🏠 Local privacy assessment complete");

    report(50, "bias", "🏠 Detecting potential bias locally...");
    let bias_score = match &request.source {
        DataSource::Uploaded(dataset) => bias_score(dataset, &schema),
        DataSource::Description(_) => bias_score(&synthesize_rows(&schema, BIAS_SAMPLE_ROWS), &schema),
    };
    report(60, "bias", "🏠 Local bias analysis complete");

    report(65, "relationships", "🏠 Mapping data relationships locally...");
    let relationships = map_relationships(&schema);
    report(70, "relationships", "🏠 Local relationship mapping complete");

    report(75, "generation", "🏠 Local generation of synthetic rows...");
    let row_count = usize::try_from(request.params.row_count).unwrap_or(usize::MAX);
    let data = synthesize_rows(&schema, row_count);

    report(90, "quality", "🏠 Validating generated data locally...");
    let quality_score = quality_score(&data, &schema);
    report(95, "quality", "🏠 Final local quality checks...");

    report(100, "complete", "✅ Local generation complete (fallback engine)");
    tracing::info!(rows = data.len(), quality_score, privacy_score, bias_score, "local pipeline finished");

    GenerationResult {
        job_id: None,
        metadata: json!({
            "rows_generated": data.len(),
            "columns": schema.len(),
            "generation_method": "local_fallback",
            "domain": request.domain,
            "data_type": request.data_type,
            "relationships": relationships,
        }),
        data,
        scores: QualityScores { quality_score, privacy_score, bias_score },
        origin: Origin::Local,
    }
}

/// Identifier columns (`id` or `*_id`) and the entity each one keys.
#[must_use]
pub fn map_relationships(schema: &Schema) -> Vec<String> {
    schema
        .iter()
        .filter_map(|(name, _)| {
            let lower = name.to_lowercase();
            let entity = if lower == "id" { "record" } else { lower.strip_suffix("_id")? };
            (!entity.is_empty()).then(|| format!("{name} identifies each {entity}"))
        })
        .collect()
}

/// Fewer identifying columns score higher; stricter privacy levels add headroom.
#[must_use]
pub fn privacy_score(schema: &Schema, privacy_level: &str) -> f64 {
    if schema.is_empty() {
        return DEFAULT_PRIVACY_SCORE;
    }
    let sensitive = schema
        .iter()
        .filter(|(name, spec)| {
            let name = name.to_lowercase();
            spec.field_type == "email"
                || spec.field_type == "phone"
                || PII_MARKERS.iter().any(|m| name.contains(m))
        })
        .count();
    let bonus = match privacy_level {
        "maximum" => 5.0,
        "high" => 3.0,
        _ => 0.0,
    };
    #[allow(clippy::cast_precision_loss)]
    let penalty = sensitive as f64 * 4.0;
    (95.0 - penalty + bonus).clamp(50.0, 100.0)
}

/// Penalizes categorical columns dominated by one value.
#[must_use]
pub fn bias_score(data: &Dataset, schema: &Schema) -> f64 {
    let mut imbalances = Vec::new();
    for (name, _) in schema.iter() {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut total = 0_usize;
        for value in data.column(name) {
            if let Value::String(s) = value {
                *counts.entry(s.clone()).or_default() += 1;
                total += 1;
            }
        }
        if total == 0 || counts.len() < 2 || counts.len() > MAX_CATEGORIES {
            continue;
        }
        let top = counts.values().copied().max().unwrap_or_default();
        #[allow(clippy::cast_precision_loss)]
        let share = top as f64 / total as f64;
        #[allow(clippy::cast_precision_loss)]
        let fair = 1.0 / counts.len() as f64;
        imbalances.push((share - fair) / (1.0 - fair));
    }
    if imbalances.is_empty() {
        return DEFAULT_BIAS_SCORE;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = imbalances.iter().sum::<f64>() / imbalances.len() as f64;
    (100.0 - mean * 50.0).clamp(50.0, 100.0).round()
}

/// Percentage of schema cells that hold a value.
#[must_use]
pub fn quality_score(data: &Dataset, schema: &Schema) -> f64 {
    let cells = data.len() * schema.len();
    if cells == 0 {
        return DEFAULT_QUALITY_SCORE;
    }
    let filled = schema
        .iter()
        .map(|(name, _)| data.column(name).filter(|v| !v.is_null()).count())
        .sum::<usize>();
    #[allow(clippy::cast_precision_loss)]
    let completeness = filled as f64 / cells as f64;
    (completeness * 100.0).round()
}
