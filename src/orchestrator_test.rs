use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use crate::model::{DataSource, FieldSpec, GenerationParams};
use crate::net::message::PROGRESS_COMPLETE;

const DESCRIPTION: &str = "Patient records with age and diagnosis";

// =========================================================================
// MockBackend
// =========================================================================

/// Scripted start-call outcome. `frames` are routed before the reply
/// returns, the way a fast backend streams progress during the request.
struct StartScript {
    frames: Vec<Value>,
    reply: Result<Value, ClientError>,
}

struct MockBackend {
    router: Arc<MessageRouter>,
    schemas: Mutex<Vec<Result<SchemaResult, ClientError>>>,
    starts: Mutex<Vec<StartScript>>,
    status: Mutex<Value>,
    schema_calls: AtomicUsize,
    start_bodies: Mutex<Vec<Value>>,
    status_requests: Mutex<Vec<String>>,
}

impl MockBackend {
    fn new(router: Arc<MessageRouter>) -> Self {
        Self {
            router,
            schemas: Mutex::new(Vec::new()),
            starts: Mutex::new(Vec::new()),
            status: Mutex::new(Value::Null),
            schema_calls: AtomicUsize::new(0),
            start_bodies: Mutex::new(Vec::new()),
            status_requests: Mutex::new(Vec::new()),
        }
    }

    fn with_schema(self, reply: Result<SchemaResult, ClientError>) -> Self {
        self.schemas.lock().unwrap().push(reply);
        self
    }

    fn with_start(self, frames: Vec<Value>, reply: Result<Value, ClientError>) -> Self {
        self.starts.lock().unwrap().push(StartScript { frames, reply });
        self
    }

    fn with_status(self, status: Value) -> Self {
        *self.status.lock().unwrap() = status;
        self
    }

    fn start_calls(&self) -> usize {
        self.start_bodies.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl BackendApi for MockBackend {
    async fn health(&self) -> Result<Value, ClientError> {
        Ok(json!({ "status": "healthy" }))
    }

    async fn schema_from_description(
        &self,
        _description: &str,
        _domain: &str,
        _data_type: &str,
    ) -> Result<SchemaResult, ClientError> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        let mut schemas = self.schemas.lock().unwrap();
        if schemas.is_empty() { Ok(remote_schema()) } else { schemas.remove(0) }
    }

    async fn analyze(&self, _sample: &Dataset, _config: &Value) -> Result<Value, ClientError> {
        Ok(Value::Null)
    }

    async fn start_generation(&self, body: &Value) -> Result<Value, ClientError> {
        self.start_bodies.lock().unwrap().push(body.clone());
        let script = {
            let mut starts = self.starts.lock().unwrap();
            if starts.is_empty() { None } else { Some(starts.remove(0)) }
        };
        let Some(script) = script else {
            return Err(refused());
        };
        for frame in &script.frames {
            self.router.dispatch(&frame.to_string());
        }
        script.reply
    }

    async fn generation_status(&self, job_id: &str) -> Result<Value, ClientError> {
        self.status_requests.lock().unwrap().push(job_id.to_owned());
        Ok(self.status.lock().unwrap().clone())
    }

    async fn list_jobs(&self) -> Result<Value, ClientError> {
        Ok(json!([]))
    }

    async fn generate_local(&self, _body: &Value) -> Result<Value, ClientError> {
        Ok(Value::Null)
    }

    async fn metrics(&self) -> Result<Value, ClientError> {
        Ok(Value::Null)
    }

    async fn agents_status(&self) -> Result<Value, ClientError> {
        Ok(Value::Null)
    }
}

// =========================================================================
// helpers
// =========================================================================

fn refused() -> ClientError {
    ClientError::Network { endpoint: START_PATH.into(), message: "connection refused".into(), timed_out: false }
}

fn remote_schema() -> SchemaResult {
    let mut schema = Schema::new();
    schema.insert("patient_id", FieldSpec::new("string", "Patient identifier"));
    schema.insert("age", FieldSpec::new("integer", "Age in years").with_range(0, 120));
    SchemaResult {
        schema,
        detected_domain: "healthcare".into(),
        estimated_rows: 500,
        relationships: Vec::new(),
        suggestions: Vec::new(),
        sample_data: Vec::new(),
    }
}

fn request(rows: u32) -> GenerationRequest {
    GenerationRequest {
        domain: "healthcare".into(),
        data_type: "tabular".into(),
        source: DataSource::Description(DESCRIPTION.into()),
        params: GenerationParams { row_count: rows, ..GenerationParams::default() },
    }
}

fn progress(job_id: &str, pct: i32, message: &str) -> Value {
    json!({ "type": "generation_progress", "job_id": job_id, "data": { "progress": pct, "message": message } })
}

struct Harness {
    orchestrator: Orchestrator,
    api: Arc<MockBackend>,
    log: Arc<Mutex<EventLog>>,
}

fn harness(build: impl FnOnce(MockBackend) -> MockBackend) -> Harness {
    let router = Arc::new(MessageRouter::new());
    let api = Arc::new(build(MockBackend::new(router.clone())));
    let log = Arc::new(Mutex::new(EventLog::new()));
    let orchestrator = Orchestrator::new(api.clone(), router, log.clone(), Duration::from_secs(5));
    Harness { orchestrator, api, log }
}

async fn ready(h: &mut Harness) {
    h.orchestrator.request_schema(DESCRIPTION, "healthcare", "tabular").await.unwrap();
    assert_eq!(h.orchestrator.phase(), Phase::SchemaReady);
}

// =========================================================================
// schema requests
// =========================================================================

#[tokio::test]
async fn short_description_is_rejected_without_network_call() {
    let mut h = harness(|m| m);
    let err = h.orchestrator.request_schema("too short", "healthcare", "tabular").await.unwrap_err();

    assert!(matches!(err, ClientError::Validation(_)));
    assert_eq!(h.orchestrator.phase(), Phase::Idle);
    assert_eq!(h.api.schema_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_selection_is_rejected() {
    let mut h = harness(|m| m);
    let err = h.orchestrator.request_schema(DESCRIPTION, "", "tabular").await.unwrap_err();

    assert!(matches!(err, ClientError::Validation(_)));
    assert_eq!(h.orchestrator.phase(), Phase::Idle);
    assert_eq!(h.api.schema_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn remote_schema_is_tagged_remote() {
    let mut h = harness(|m| m);
    let resolved = h.orchestrator.request_schema(DESCRIPTION, "healthcare", "tabular").await.unwrap();

    assert_eq!(resolved.origin, Origin::Remote);
    assert_eq!(resolved.result.schema.field_names(), vec!["patient_id", "age"]);
    assert_eq!(h.orchestrator.phase(), Phase::SchemaReady);
}

#[tokio::test]
async fn unreachable_backend_falls_back_to_local_schema() {
    let mut h = harness(|m| m.with_schema(Err(refused())));
    let resolved = h.orchestrator.request_schema(DESCRIPTION, "healthcare", "tabular").await.unwrap();

    assert_eq!(resolved.origin, Origin::Local);
    assert!(resolved.result.schema.get("patient_id").is_some());
    assert_eq!(h.orchestrator.phase(), Phase::SchemaReady);
    assert!(h.orchestrator.last_error().is_none());
}

#[tokio::test]
async fn empty_remote_schema_falls_back() {
    let empty = SchemaResult { schema: Schema::new(), ..remote_schema() };
    let mut h = harness(|m| m.with_schema(Ok(empty)));
    let resolved = h.orchestrator.request_schema(DESCRIPTION, "healthcare", "tabular").await.unwrap();

    assert_eq!(resolved.origin, Origin::Local);
    assert!(!resolved.result.schema.is_empty());
}

#[tokio::test]
async fn schema_failure_without_fallback_enters_error_and_retry_recovers() {
    let mut h = harness(|m| m.with_schema(Err(refused())));
    h.orchestrator = Orchestrator::new(
        h.api.clone(),
        Arc::new(MessageRouter::new()),
        h.log.clone(),
        Duration::from_secs(5),
    )
    .with_fallback(false);

    let err = h.orchestrator.request_schema(DESCRIPTION, "healthcare", "tabular").await.unwrap_err();
    assert!(err.user_message().starts_with("Backend not running"));
    assert_eq!(h.orchestrator.phase(), Phase::Failed { during: Stage::Schema });
    assert!(h.orchestrator.last_error().is_some());

    let phase = h.orchestrator.retry().await.unwrap();
    assert_eq!(phase, Phase::SchemaReady);
    assert_eq!(h.orchestrator.schema().unwrap().origin, Origin::Remote);
    assert_eq!(h.api.schema_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn phase_changes_are_observable() {
    let mut h = harness(|m| m);
    let mut phases = h.orchestrator.subscribe_phase();
    ready(&mut h).await;

    assert!(phases.has_changed().unwrap());
    assert_eq!(*phases.borrow_and_update(), Phase::SchemaReady);
}

// =========================================================================
// uploads
// =========================================================================

#[test]
fn upload_lands_in_schema_ready() {
    let mut h = harness(|m| m);
    let resolved = h
        .orchestrator
        .load_upload("people.csv", "name,age\nAda,36\nGrace,45\n", "general")
        .unwrap();

    assert_eq!(resolved.origin, Origin::Local);
    assert_eq!(resolved.result.schema.field_names(), vec!["name", "age"]);
    assert_eq!(h.orchestrator.uploaded().unwrap().len(), 2);
    assert_eq!(h.orchestrator.phase(), Phase::SchemaReady);
}

#[test]
fn rejected_upload_leaves_phase_unchanged() {
    let mut h = harness(|m| m);
    let err = h.orchestrator.load_upload("data.xlsx", "PK", "general").unwrap_err();

    assert!(matches!(err, ClientError::Unsupported { .. }));
    assert_eq!(h.orchestrator.phase(), Phase::Idle);
    assert!(h.orchestrator.uploaded().is_none());
}

// =========================================================================
// generation
// =========================================================================

#[tokio::test]
async fn generate_from_idle_is_state_error() {
    let mut h = harness(|m| m);
    let err = h.orchestrator.generate(request(10)).await.unwrap_err();

    assert!(matches!(err, ClientError::State { action: "generate", ref phase } if phase == "idle"));
    assert_eq!(h.orchestrator.phase(), Phase::Idle);
    assert_eq!(h.api.start_calls(), 0);
}

#[tokio::test]
async fn row_count_out_of_range_is_rejected() {
    let mut h = harness(|m| m);
    ready(&mut h).await;

    for rows in [0, MAX_ROW_COUNT + 1] {
        let err = h.orchestrator.generate(request(rows)).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }
    assert_eq!(h.orchestrator.phase(), Phase::SchemaReady);
    assert_eq!(h.api.start_calls(), 0);
}

#[tokio::test]
async fn non_streaming_reply_completes_immediately() {
    let reply = json!({
        "job_id": "job-3",
        "data": [{ "patient_id": "PT1000" }, { "patient_id": "PT1001" }],
        "metadata": { "quality_score": 91.0 }
    });
    let mut h = harness(|m| m.with_start(Vec::new(), Ok(reply)));
    ready(&mut h).await;

    let result = h.orchestrator.generate(request(2)).await.unwrap();
    assert_eq!(result.origin, Origin::Remote);
    assert_eq!(result.data.len(), 2);
    assert!((result.scores.quality_score - 91.0).abs() < f64::EPSILON);
    assert_eq!(h.orchestrator.phase(), Phase::Complete);

    let bodies = h.api.start_bodies.lock().unwrap();
    assert_eq!(bodies[0]["config"]["rowCount"], 2);
    assert!(bodies[0]["schema"].get("patient_id").is_some());
}

#[tokio::test]
async fn terminal_progress_for_job_completes_with_status_result() {
    let frames = vec![
        progress("job-1", 50, "🤖 Agents working"),
        progress("job-other", PROGRESS_COMPLETE, "✅ someone else finished"),
        progress("job-1", PROGRESS_COMPLETE, "✅ Generation completed"),
    ];
    let status = json!({
        "status": "completed",
        "result": { "data": [{ "patient_id": "PT1000" }], "quality_score": 90.0 }
    });
    let mut h = harness(|m| {
        m.with_start(frames, Ok(json!({ "job_id": "job-1", "status": "started" })))
            .with_status(status)
    });
    ready(&mut h).await;

    let result = h.orchestrator.generate(request(1)).await.unwrap();
    assert_eq!(result.job_id.as_deref(), Some("job-1"));
    assert_eq!(result.data.len(), 1);
    assert_eq!(*h.api.status_requests.lock().unwrap(), vec!["job-1".to_owned()]);
    assert_eq!(h.orchestrator.phase(), Phase::Complete);
}

#[tokio::test]
async fn failure_sentinel_enters_error_with_message() {
    let frames = vec![progress("job-2", -1, "❌ Generation failed: quota exceeded")];
    let mut h = harness(|m| m.with_start(frames, Ok(json!({ "job_id": "job-2" }))));
    ready(&mut h).await;

    let err = h.orchestrator.generate(request(5)).await.unwrap_err();
    assert!(
        matches!(err, ClientError::JobFailed { ref message, .. } if message == "❌ Generation failed: quota exceeded")
    );
    assert_eq!(h.orchestrator.phase(), Phase::Failed { during: Stage::Generation });
    assert!(h.orchestrator.result().is_none());
}

#[tokio::test(start_paused = true)]
async fn missing_terminal_progress_times_out() {
    let mut h = harness(|m| m.with_start(Vec::new(), Ok(json!({ "job_id": "job-9" }))));
    ready(&mut h).await;

    let err = h.orchestrator.generate(request(5)).await.unwrap_err();
    assert!(matches!(err, ClientError::Network { timed_out: true, .. }));
    assert_eq!(h.orchestrator.phase(), Phase::Failed { during: Stage::Generation });
}

#[tokio::test]
async fn start_failure_runs_local_pipeline() {
    let mut h = harness(|m| m.with_start(Vec::new(), Err(refused())));
    ready(&mut h).await;

    let result = h.orchestrator.generate(request(25)).await.unwrap();
    assert_eq!(result.origin, Origin::Local);
    assert_eq!(result.data.len(), 25);
    assert_eq!(result.data.columns, vec!["patient_id", "age"]);
    assert_eq!(h.orchestrator.phase(), Phase::Complete);

    let log = h.log.lock().unwrap();
    assert!(!log.is_generating());
    // Seeded start entry plus one per pipeline checkpoint.
    assert_eq!(log.len(), 13);
    assert_eq!(log.last().unwrap().progress, Some(PROGRESS_COMPLETE));
}

#[tokio::test]
async fn start_failure_after_progress_does_not_fall_back() {
    let frames = vec![progress("job-4", 10, "🤖 Schema agent started")];
    let mut h = harness(|m| m.with_start(frames, Err(refused())));
    ready(&mut h).await;

    let err = h.orchestrator.generate(request(5)).await.unwrap_err();
    assert!(matches!(err, ClientError::Network { .. }));
    assert_eq!(h.orchestrator.phase(), Phase::Failed { during: Stage::Generation });
}

#[tokio::test]
async fn generate_from_error_resumes_from_schema_ready() {
    let reply = json!({ "data": [{ "patient_id": "PT1000" }] });
    let mut h = harness(|m| m.with_start(Vec::new(), Err(refused())).with_start(Vec::new(), Ok(reply)));
    let router = Arc::new(MessageRouter::new());
    h.orchestrator =
        Orchestrator::new(h.api.clone(), router, h.log.clone(), Duration::from_secs(5)).with_fallback(false);
    ready(&mut h).await;
    let schema = h.orchestrator.schema().cloned();

    h.orchestrator.generate(request(1)).await.unwrap_err();
    assert_eq!(h.orchestrator.phase(), Phase::Failed { during: Stage::Generation });

    let result = h.orchestrator.generate(request(1)).await.unwrap();
    assert_eq!(result.data.len(), 1);
    assert_eq!(h.orchestrator.phase(), Phase::Complete);
    assert_eq!(h.orchestrator.schema().cloned(), schema);
    assert_eq!(h.api.schema_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_outside_error_is_state_error() {
    let mut h = harness(|m| m);
    ready(&mut h).await;

    let err = h.orchestrator.retry().await.unwrap_err();
    assert!(matches!(err, ClientError::State { action: "retry", .. }));
}

#[tokio::test]
async fn reset_returns_to_idle() {
    let mut h = harness(|m| m);
    ready(&mut h).await;

    h.orchestrator.reset();
    assert_eq!(h.orchestrator.phase(), Phase::Idle);
    assert!(h.orchestrator.schema().is_none());
}
