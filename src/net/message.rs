//! Inbound duplex message types.
//!
//! DESIGN
//! ======
//! Every server frame is decoded into a closed tagged union keyed by its
//! `type` field. Types this client does not consume land in
//! [`InboundMessage::Unknown`] instead of an open-ended JSON blob.
//!
//! The server does not tag which engine produced a progress message, so the
//! three progress facets are derived from free text in [`derive_facets`].
//! Nothing downstream looks at the text markers directly; replacing that one
//! function is enough when the server starts sending structured tags.

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;

use std::collections::BTreeMap;

use serde_json::Value;

/// Progress value signalling a finished job.
pub const PROGRESS_COMPLETE: i32 = 100;
/// Progress value signalling a failed job.
pub const PROGRESS_FAILED: i32 = -1;

const GEMINI_MARKERS: &[&str] = &["gemini", "🤖"];
const FALLBACK_MARKERS: &[&str] = &["fallback", "local generation", "offline mode", "🏠"];
const AGENT_MARKERS: &[&str] = &["agent", "🧠"];

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no string `type` field")]
    MissingType,
}

/// Boolean facets derived from a progress message's free text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFacets {
    /// The primary AI engine is producing this step.
    pub gemini_active: bool,
    /// The backend fell back to its local engine.
    pub fallback_active: bool,
    /// An autonomous agent (privacy, bias, quality, ...) is working.
    pub agent_active: bool,
}

/// A job progress payload from `generation_progress` or `generation_update`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub job_id: Option<String>,
    pub step: Option<String>,
    /// 0-100, or [`PROGRESS_FAILED`].
    pub progress: Option<i32>,
    pub message: String,
    pub facets: MessageFacets,
}

impl ProgressUpdate {
    /// Build an update from text, deriving facets the same way inbound frames do.
    #[must_use]
    pub fn new(job_id: Option<String>, progress: Option<i32>, message: impl Into<String>) -> Self {
        let message = message.into();
        let facets = derive_facets(&message);
        Self { job_id, step: None, progress, message, facets }
    }

    #[must_use]
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.progress == Some(PROGRESS_COMPLETE)
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.progress == Some(PROGRESS_FAILED)
    }

    /// Complete or failed: no further progress will arrive for this job.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.is_complete() || self.is_failure()
    }
}

/// Payload of `connection_established`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionAck {
    pub client_id: Option<String>,
    pub message: Option<String>,
}

/// One agent's row in an `agent_status` frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentState {
    pub status: String,
    pub performance: Option<f64>,
    pub agent_type: Option<String>,
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// `generation_progress`
    Progress(ProgressUpdate),
    /// `generation_update`
    JobUpdate(ProgressUpdate),
    /// `agent_status`, keyed by agent id.
    AgentStatus(BTreeMap<String, AgentState>),
    /// `connection_established`
    ConnectionAck(ConnectionAck),
    /// `pong`
    HeartbeatAck { timestamp: Option<f64> },
    /// Any other `type`.
    Unknown { kind: String },
}

impl InboundMessage {
    /// Wire tag this message was decoded from.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Progress(_) => "generation_progress",
            Self::JobUpdate(_) => "generation_update",
            Self::AgentStatus(_) => "agent_status",
            Self::ConnectionAck(_) => "connection_established",
            Self::HeartbeatAck { .. } => "pong",
            Self::Unknown { kind } => kind,
        }
    }
}

/// Decode one text frame.
///
/// # Errors
///
/// Returns an error when the frame is not JSON or carries no `type` tag.
pub fn parse_inbound(raw: &str) -> Result<InboundMessage, MessageError> {
    let value: Value = serde_json::from_str(raw)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(MessageError::MissingType)?;

    let message = match kind {
        "generation_progress" => InboundMessage::Progress(parse_progress(&value)),
        "generation_update" => InboundMessage::JobUpdate(parse_progress(&value)),
        "agent_status" => InboundMessage::AgentStatus(parse_agent_status(&value)),
        "connection_established" => InboundMessage::ConnectionAck(ConnectionAck {
            client_id: pick_str(&value, &["client_id", "clientId"]).map(str::to_owned),
            message: pick_str(&value, &["message"]).map(str::to_owned),
        }),
        "pong" => InboundMessage::HeartbeatAck { timestamp: pick_number(&value, &["timestamp"]) },
        other => InboundMessage::Unknown { kind: other.to_owned() },
    };
    Ok(message)
}

/// Derive progress facets from message text (case-insensitive).
#[must_use]
pub fn derive_facets(message: &str) -> MessageFacets {
    let lower = message.to_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));
    MessageFacets {
        gemini_active: has(GEMINI_MARKERS),
        fallback_active: has(FALLBACK_MARKERS),
        agent_active: has(AGENT_MARKERS),
    }
}

/// Build the heartbeat frame sent every interval.
#[must_use]
pub fn ping_frame(timestamp_ms: u64) -> String {
    serde_json::json!({ "type": "ping", "timestamp": timestamp_ms }).to_string()
}

fn parse_progress(value: &Value) -> ProgressUpdate {
    // Backend nests the update under `data`; older senders put it at top level.
    let payload = value.get("data").filter(|d| d.is_object()).unwrap_or(value);

    let job_id = pick_str(value, &["job_id", "jobId"])
        .or_else(|| pick_str(payload, &["job_id", "jobId"]))
        .map(str::to_owned);
    let step = payload.get("step").and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    #[allow(clippy::cast_possible_truncation)]
    let progress = pick_number(payload, &["progress"]).map(|n| n.round() as i32);
    let message = pick_str(payload, &["message", "status"]).unwrap_or_default().to_owned();

    let facets = derive_facets(&message);
    ProgressUpdate { job_id, step, progress, message, facets }
}

fn parse_agent_status(value: &Value) -> BTreeMap<String, AgentState> {
    let Some(rows) = value.get("data").and_then(Value::as_object) else {
        return BTreeMap::new();
    };
    rows.iter()
        .filter_map(|(agent_id, row)| {
            let row = row.as_object()?;
            let state = AgentState {
                status: row.get("status").and_then(Value::as_str).unwrap_or("unknown").to_owned(),
                performance: row.get("performance").and_then(Value::as_f64),
                agent_type: row.get("agent_type").and_then(Value::as_str).map(str::to_owned),
                details: row.get("details").cloned().unwrap_or(Value::Null),
            };
            Some((agent_id.clone(), state))
        })
        .collect()
}

fn pick_str<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| payload.get(*key).and_then(Value::as_str))
}

fn pick_number(payload: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| {
        let v = payload.get(*key)?;
        v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
    })
}
