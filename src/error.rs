//! Client error taxonomy.
//!
//! DESIGN
//! ======
//! Errors are split by where they can be resolved. Validation and state
//! errors never leave the client and never trigger a fallback. Network and
//! remote errors on schema/generation calls are eligible for the one-shot
//! local fallback before anything is surfaced. Parse errors are terminal for
//! the upload attempt that produced them.

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;

/// Violated constraint while parsing an uploaded CSV/JSON file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Fewer than two non-blank lines (header plus at least one row).
    #[error("file must contain a header line and at least one data row")]
    TooFewLines,
    /// Header line produced no usable column names.
    #[error("header line has no column names")]
    EmptyHeaders,
    /// Every data row was blank or filtered out.
    #[error("no data rows remain after filtering blank lines")]
    NoDataRows,
    /// A quoted field was never closed.
    #[error("unterminated quoted field on line {line}")]
    UnbalancedQuote { line: usize },
    /// The document is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    /// Valid JSON whose top level is neither an array nor an object.
    #[error("JSON must be an array of records or a single record object")]
    InvalidJsonShape,
}

/// Errors produced by client operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Bad or missing user input; no network call was attempted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The backend could not be reached or did not answer in time.
    #[error("network error calling {endpoint}: {message}")]
    Network { endpoint: String, message: String, timed_out: bool },

    /// The backend answered with a non-success status.
    #[error("remote error: status {status}")]
    Remote { status: u16, body: String },

    /// An uploaded file or response body could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The uploaded file has an extension no parser accepts.
    #[error("unsupported file format: {file_name}")]
    Unsupported { file_name: String },

    /// The orchestrator was asked to do something its current phase forbids.
    #[error("cannot {action} while {phase}")]
    State { action: &'static str, phase: String },

    /// The backend reported the job failed (progress sentinel `-1`).
    #[error("generation job failed: {message}")]
    JobFailed { job_id: Option<String>, message: String },

    /// The duplex channel failed to open or send.
    #[error("channel error: {0}")]
    Channel(String),

    /// A configuration value is malformed.
    #[error("config error: {0}")]
    Config(String),

    /// Local session storage could not be read or written.
    #[error("session storage error: {0}")]
    Storage(String),
}

impl ClientError {
    /// Network and remote failures retry once through the local fallback engine.
    #[must_use]
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Remote { .. })
    }

    /// Human-readable, cause-specific message for toast/banner display.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Network { timed_out: true, .. } => {
                "The backend did not respond in time. Try again in a moment.".to_owned()
            }
            Self::Network { .. } => {
                "Backend not running. Start the API server or continue with local generation.".to_owned()
            }
            Self::Remote { status: 404, .. } => "Endpoint not found. The backend may be out of date.".to_owned(),
            Self::Remote { status: 401, .. } => "Your session expired. Sign in again.".to_owned(),
            Self::Remote { status, .. } if *status >= 500 => format!("Server error ({status}). Please retry."),
            Self::Validation(message) => message.clone(),
            Self::Parse(err) => format!("Could not read file: {err}"),
            Self::Unsupported { file_name } => {
                format!("{file_name} is not supported. Upload a .csv or .json file.")
            }
            Self::State { .. } => self.to_string(),
            Self::JobFailed { message, .. } => format!("Generation failed: {message}"),
            Self::Remote { .. } | Self::Channel(_) | Self::Config(_) | Self::Storage(_) => {
                format!("Unknown error: {self}")
            }
        }
    }

    pub(crate) fn network(endpoint: &str, err: &reqwest::Error) -> Self {
        Self::Network {
            endpoint: endpoint.to_owned(),
            message: err.to_string(),
            timed_out: err.is_timeout(),
        }
    }
}
