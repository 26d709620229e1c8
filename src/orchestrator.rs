//! Generation orchestrator — the schema → generate state machine.
//!
//! DESIGN
//! ======
//! ```text
//! idle ─▶ schema-pending ─▶ schema-ready ─▶ generating ─▶ complete
//!               │                 ▲   ▲          │
//!               ▼                 │   │          ▼
//!         error(schema) ──retry───┘   └──retry── error(generation)
//! ```
//!
//! The orchestrator is owned by one caller (`&mut self` on every action), so
//! two actions can never interleave. The current [`Phase`] is also published
//! on a `watch` channel for observers that render it.
//!
//! A generation job subscribes to the router's progress stream *before* the
//! start request goes out, so a terminal update that races the HTTP reply is
//! never missed.
//!
//! ERROR HANDLING
//! ==============
//! Validation and state errors return immediately and leave the phase
//! untouched. Network and remote failures on the schema or start call fall
//! back once to the local engine (when enabled). Anything else lands in
//! [`Phase::Failed`], which remembers the stage it failed in so a retry
//! resumes from there and keeps an already resolved schema.

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::watch;

use crate::api::{BackendApi, START_PATH};
use crate::dataset::Dataset;
use crate::error::ClientError;
use crate::fallback::{parse_upload, run_local_pipeline, schema_from_description, schema_from_upload};
use crate::model::{GenerationRequest, GenerationResult, Origin, QualityScores, Schema, SchemaResult};
use crate::net::message::ProgressUpdate;
use crate::net::router::MessageRouter;
use crate::progress_log::EventLog;

/// Shortest description accepted for a schema request.
pub const MIN_DESCRIPTION_CHARS: usize = 10;
/// Largest row count a single generation may ask for.
pub const MAX_ROW_COUNT: u32 = 100_000;

const EMPTY_SCHEMA_BODY: &str = "schema response contained no fields";

/// Stage an error happened in; a retry resumes there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Schema,
    Generation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    SchemaPending,
    SchemaReady,
    Generating,
    Complete,
    Failed { during: Stage },
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::SchemaPending => "schema-pending",
            Self::SchemaReady => "schema-ready",
            Self::Generating => "generating",
            Self::Complete => "complete",
            Self::Failed { .. } => "error",
        }
    }

    fn is_busy(self) -> bool {
        matches!(self, Self::SchemaPending | Self::Generating)
    }
}

/// A schema the orchestrator can generate from, tagged with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSchema {
    pub result: SchemaResult,
    pub origin: Origin,
}

#[derive(Debug, Clone)]
struct SchemaRequest {
    description: String,
    domain: String,
    data_type: String,
}

pub struct Orchestrator {
    api: Arc<dyn BackendApi>,
    router: Arc<MessageRouter>,
    log: Arc<Mutex<EventLog>>,
    generation_timeout: Duration,
    fallback: bool,
    phase: watch::Sender<Phase>,
    schema: Option<ResolvedSchema>,
    schema_request: Option<SchemaRequest>,
    uploaded: Option<Dataset>,
    last_request: Option<GenerationRequest>,
    last_error: Option<ClientError>,
    result: Option<GenerationResult>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        api: Arc<dyn BackendApi>,
        router: Arc<MessageRouter>,
        log: Arc<Mutex<EventLog>>,
        generation_timeout: Duration,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            api,
            router,
            log,
            generation_timeout,
            fallback: true,
            phase,
            schema: None,
            schema_request: None,
            uploaded: None,
            last_request: None,
            last_error: None,
            result: None,
        }
    }

    /// Enable or disable the one-shot local fallback (on by default).
    #[must_use]
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback = enabled;
        self
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    #[must_use]
    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    #[must_use]
    pub fn schema(&self) -> Option<&ResolvedSchema> {
        self.schema.as_ref()
    }

    #[must_use]
    pub fn uploaded(&self) -> Option<&Dataset> {
        self.uploaded.as_ref()
    }

    #[must_use]
    pub fn result(&self) -> Option<&GenerationResult> {
        self.result.as_ref()
    }

    /// Error that moved the machine into [`Phase::Failed`].
    #[must_use]
    pub fn last_error(&self) -> Option<&ClientError> {
        self.last_error.as_ref()
    }

    /// Resolve a schema from a natural-language description.
    ///
    /// # Errors
    ///
    /// `Validation` for a short description or missing selection (no call is
    /// made), `State` while another action is in flight, otherwise the remote
    /// error when the fallback is disabled or not applicable.
    pub async fn request_schema(
        &mut self,
        description: &str,
        domain: &str,
        data_type: &str,
    ) -> Result<ResolvedSchema, ClientError> {
        self.ensure_not_busy("request a schema")?;
        if description.trim().chars().count() < MIN_DESCRIPTION_CHARS {
            return Err(ClientError::Validation(format!(
                "Describe the data in at least {MIN_DESCRIPTION_CHARS} characters."
            )));
        }
        validate_selection(domain, data_type)?;

        self.uploaded = None;
        self.resolve_schema(SchemaRequest {
            description: description.trim().to_owned(),
            domain: domain.to_owned(),
            data_type: data_type.to_owned(),
        })
        .await
    }

    /// Parse an uploaded file and infer its schema locally.
    ///
    /// Parse failures are terminal for this upload and do not change the phase.
    ///
    /// # Errors
    ///
    /// `Unsupported` or `Parse` from the upload parser, `State` while busy.
    pub fn load_upload(&mut self, file_name: &str, contents: &str, domain: &str) -> Result<ResolvedSchema, ClientError> {
        self.ensure_not_busy("load an upload")?;
        let dataset = parse_upload(file_name, contents)?;
        let resolved = ResolvedSchema { result: schema_from_upload(&dataset, domain), origin: Origin::Local };
        tracing::info!(file_name, rows = dataset.len(), fields = resolved.result.schema.len(), "upload parsed");

        self.uploaded = Some(dataset);
        self.schema = Some(resolved.clone());
        self.schema_request = None;
        self.last_error = None;
        self.set_phase(Phase::SchemaReady);
        Ok(resolved)
    }

    /// Generate a dataset from the resolved schema.
    ///
    /// Allowed from `schema-ready`, `complete`, or a failed state that still
    /// holds a schema. A failed generation retried here resumes from
    /// `schema-ready` without re-requesting the schema.
    ///
    /// # Errors
    ///
    /// `State` without a resolved schema, `Validation` for a bad selection or
    /// row count, `JobFailed` when the backend reports failure, otherwise the
    /// remote error that could not be recovered locally.
    pub async fn generate(&mut self, request: GenerationRequest) -> Result<GenerationResult, ClientError> {
        let phase = self.phase();
        let ready = matches!(phase, Phase::SchemaReady | Phase::Complete | Phase::Failed { .. });
        if !ready || self.schema.is_none() {
            return Err(ClientError::State { action: "generate", phase: phase.as_str().to_owned() });
        }
        validate_selection(&request.domain, &request.data_type)?;
        if !(1..=MAX_ROW_COUNT).contains(&request.params.row_count) {
            return Err(ClientError::Validation(format!("Row count must be between 1 and {MAX_ROW_COUNT}.")));
        }

        if matches!(phase, Phase::Failed { .. }) {
            self.set_phase(Phase::SchemaReady);
        }
        self.last_request = Some(request.clone());
        self.run_generation(&request).await
    }

    /// Re-run the action that failed, from the stage it failed in.
    ///
    /// # Errors
    ///
    /// `State` when the machine is not in a failed state, otherwise whatever
    /// the retried action returns.
    pub async fn retry(&mut self) -> Result<Phase, ClientError> {
        let phase = self.phase();
        match phase {
            Phase::Failed { during: Stage::Schema } => {
                let request = self.schema_request.clone().ok_or(ClientError::State {
                    action: "retry",
                    phase: phase.as_str().to_owned(),
                })?;
                self.resolve_schema(request).await?;
            }
            Phase::Failed { during: Stage::Generation } => {
                let request = self.last_request.clone().ok_or(ClientError::State {
                    action: "retry",
                    phase: phase.as_str().to_owned(),
                })?;
                self.generate(request).await?;
            }
            _ => return Err(ClientError::State { action: "retry", phase: phase.as_str().to_owned() }),
        }
        Ok(self.phase())
    }

    /// Forget schema, upload and result; back to `idle`.
    pub fn reset(&mut self) {
        self.schema = None;
        self.schema_request = None;
        self.uploaded = None;
        self.last_request = None;
        self.last_error = None;
        self.result = None;
        self.set_phase(Phase::Idle);
    }

    async fn resolve_schema(&mut self, request: SchemaRequest) -> Result<ResolvedSchema, ClientError> {
        self.schema = None;
        self.schema_request = Some(request.clone());
        self.set_phase(Phase::SchemaPending);

        let outcome = match self
            .api
            .schema_from_description(&request.description, &request.domain, &request.data_type)
            .await
        {
            Ok(result) if !result.schema.is_empty() => Ok(result),
            Ok(_) => Err(ClientError::Remote { status: 200, body: EMPTY_SCHEMA_BODY.to_owned() }),
            Err(err) => Err(err),
        };

        let resolved = match outcome {
            Ok(result) => ResolvedSchema { result, origin: Origin::Remote },
            Err(err) if self.fallback && err.is_fallback_eligible() => {
                tracing::warn!(error = %err, "remote schema unavailable; using local fallback");
                ResolvedSchema {
                    result: schema_from_description(&request.description, &request.domain),
                    origin: Origin::Local,
                }
            }
            Err(err) => return Err(self.fail(Stage::Schema, err)),
        };

        tracing::info!(origin = resolved.origin.label(), fields = resolved.result.schema.len(), "schema ready");
        self.schema = Some(resolved.clone());
        self.last_error = None;
        self.set_phase(Phase::SchemaReady);
        Ok(resolved)
    }

    async fn run_generation(&mut self, request: &GenerationRequest) -> Result<GenerationResult, ClientError> {
        let schema = self.schema.as_ref().map(|s| s.result.schema.clone()).unwrap_or_default();
        self.result = None;
        self.set_phase(Phase::Generating);
        self.with_log(|log| log.set_generating(true));

        let outcome = self.produce(request, &schema).await;
        self.with_log(|log| log.set_generating(false));

        match outcome {
            Ok(result) => {
                tracing::info!(
                    job_id = ?result.job_id,
                    origin = result.origin.label(),
                    rows = result.data.len(),
                    "generation complete"
                );
                self.result = Some(result.clone());
                self.last_error = None;
                self.set_phase(Phase::Complete);
                Ok(result)
            }
            Err(err) => Err(self.fail(Stage::Generation, err)),
        }
    }

    async fn produce(&self, request: &GenerationRequest, schema: &Schema) -> Result<GenerationResult, ClientError> {
        let mut events = self.router.subscribe_events();

        let reply = match self.api.start_generation(&request.start_body(schema)).await {
            Ok(reply) => reply,
            Err(err) if self.fallback && err.is_fallback_eligible() && !progress_arrived(&mut events) => {
                tracing::warn!(error = %err, "remote generation unavailable; running local pipeline");
                return Ok(self.generate_locally(request, schema));
            }
            Err(err) => return Err(err),
        };

        if let Some(result) = GenerationResult::from_remote(&reply) {
            return Ok(result);
        }

        let job_id = reply.get("job_id").and_then(Value::as_str).map(str::to_owned);
        tracing::info!(job_id = ?job_id, "generation started; awaiting progress");

        let terminal = tokio::time::timeout(self.generation_timeout, wait_for_terminal(&mut events, job_id.as_deref()))
            .await
            .map_err(|_| ClientError::Network {
                endpoint: START_PATH.to_owned(),
                message: format!("no terminal progress within {}s", self.generation_timeout.as_secs()),
                timed_out: true,
            })??;

        if terminal.is_failure() {
            return Err(ClientError::JobFailed { job_id, message: terminal.message });
        }
        self.fetch_result(job_id).await
    }

    async fn fetch_result(&self, job_id: Option<String>) -> Result<GenerationResult, ClientError> {
        let Some(job_id) = job_id else {
            return Ok(empty_remote_result(None, Value::Null));
        };
        let status = self.api.generation_status(&job_id).await?;
        let payload = status.get("result").unwrap_or(&status);
        match GenerationResult::from_remote(payload) {
            Some(mut result) => {
                result.job_id.get_or_insert(job_id);
                Ok(result)
            }
            None => {
                tracing::warn!(job_id = %job_id, "job finished without rows in its status payload");
                Ok(empty_remote_result(Some(job_id), status))
            }
        }
    }

    fn generate_locally(&self, request: &GenerationRequest, schema: &Schema) -> GenerationResult {
        let schema = (!schema.is_empty()).then_some(schema);
        run_local_pipeline(request, schema, |update| {
            self.with_log(|log| {
                log.record(&update);
            });
        })
    }

    fn fail(&mut self, during: Stage, err: ClientError) -> ClientError {
        tracing::warn!(stage = ?during, error = %err, "orchestrator entered error state");
        self.last_error = Some(err.clone());
        self.set_phase(Phase::Failed { during });
        err
    }

    fn ensure_not_busy(&self, action: &'static str) -> Result<(), ClientError> {
        let phase = self.phase();
        if phase.is_busy() {
            return Err(ClientError::State { action, phase: phase.as_str().to_owned() });
        }
        Ok(())
    }

    fn set_phase(&self, next: Phase) {
        let previous = self.phase.send_replace(next);
        if previous != next {
            tracing::debug!(from = previous.as_str(), to = next.as_str(), "phase transition");
        }
    }

    fn with_log(&self, f: impl FnOnce(&mut EventLog)) {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut log);
    }
}

fn validate_selection(domain: &str, data_type: &str) -> Result<(), ClientError> {
    if domain.trim().is_empty() || data_type.trim().is_empty() {
        return Err(ClientError::Validation("Select both a domain and a data type.".to_owned()));
    }
    Ok(())
}

/// Whether any progress reached the router since `events` subscribed.
fn progress_arrived(events: &mut broadcast::Receiver<ProgressUpdate>) -> bool {
    matches!(events.try_recv(), Ok(_) | Err(TryRecvError::Lagged(_)))
}

/// Wait for the terminal update of `job_id`. Updates without a job id are
/// accepted, matching backends that only stream progress for one job.
async fn wait_for_terminal(
    events: &mut broadcast::Receiver<ProgressUpdate>,
    job_id: Option<&str>,
) -> Result<ProgressUpdate, ClientError> {
    loop {
        match events.recv().await {
            Ok(update) => {
                if let (Some(want), Some(got)) = (job_id, update.job_id.as_deref())
                    && want != got
                {
                    continue;
                }
                if update.is_terminal() {
                    return Ok(update);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "progress stream lagged while awaiting job");
            }
            Err(RecvError::Closed) => {
                return Err(ClientError::Channel("progress stream closed before the job finished".to_owned()));
            }
        }
    }
}

fn empty_remote_result(job_id: Option<String>, metadata: Value) -> GenerationResult {
    GenerationResult {
        job_id,
        data: Dataset::default(),
        scores: QualityScores::default(),
        origin: Origin::Remote,
        metadata,
    }
}
