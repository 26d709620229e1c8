//! HTTP boundary to the generation backend.
//!
//! DESIGN
//! ======
//! [`BackendApi`] is the seam the orchestrator talks to; [`HttpBackend`] is
//! the reqwest implementation. Every call carries an explicit timeout from
//! its endpoint class (health, request, generation), so a stalled backend
//! surfaces as [`ClientError::Network`] with `timed_out` set instead of a
//! hang.
//!
//! ERROR HANDLING
//! ==============
//! - transport failure → `Network`
//! - non-2xx → `Remote { status, body }`
//! - `401` additionally clears the persisted session
//! - undecodable 2xx body → `Parse(InvalidJson)`

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::auth::SessionStore;
use crate::config::{ClientConfig, Timeouts};
use crate::dataset::Dataset;
use crate::error::{ClientError, ParseError};
use crate::model::SchemaResult;

pub const HEALTH_PATH: &str = "/health";
pub const START_PATH: &str = "/generation/start";
pub const STATUS_PATH: &str = "/generation/status";
pub const JOBS_PATH: &str = "/generation/jobs";
pub const ANALYZE_PATH: &str = "/generation/analyze";
pub const SCHEMA_PATH: &str = "/generation/schema-from-description";
pub const GENERATE_LOCAL_PATH: &str = "/generation/generate-local";
pub const METRICS_PATH: &str = "/analytics/metrics";
pub const AGENTS_PATH: &str = "/agents/status";

const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Backend operations used by the client.
#[async_trait::async_trait]
pub trait BackendApi: Send + Sync {
    async fn health(&self) -> Result<Value, ClientError>;

    async fn schema_from_description(
        &self,
        description: &str,
        domain: &str,
        data_type: &str,
    ) -> Result<SchemaResult, ClientError>;

    async fn analyze(&self, sample: &Dataset, config: &Value) -> Result<Value, ClientError>;

    /// Start a generation job. The reply is either a job handle
    /// (`{job_id, ...}`) or, on non-streaming backends, the full result.
    async fn start_generation(&self, body: &Value) -> Result<Value, ClientError>;

    async fn generation_status(&self, job_id: &str) -> Result<Value, ClientError>;

    async fn list_jobs(&self) -> Result<Value, ClientError>;

    async fn generate_local(&self, body: &Value) -> Result<Value, ClientError>;

    async fn metrics(&self) -> Result<Value, ClientError>;

    async fn agents_status(&self) -> Result<Value, ClientError>;
}

pub struct HttpBackend {
    http: reqwest::Client,
    base: String,
    timeouts: Timeouts,
    session: Arc<SessionStore>,
}

impl HttpBackend {
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig, session: Arc<SessionStore>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ClientError::Config(format!("http client: {e}")))?;
        Ok(Self { http, base: config.api_base(), timeouts: config.timeouts, session })
    }

    async fn call(&self, method: Method, path: &str, body: Option<&Value>, timeout: Duration) -> Result<Value, ClientError> {
        let text = self.send(method, path, body, timeout).await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        parse_reply(&text)
    }

    /// Issue one request and return the raw reply text of a 2xx response.
    async fn send(&self, method: Method, path: &str, body: Option<&Value>, timeout: Duration) -> Result<String, ClientError> {
        let url = format!("{}{path}", self.base);
        let mut request = self.http.request(method.clone(), &url).timeout(timeout);
        if let Some(token) = self.session.bearer_token() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!(%method, path, "backend request");
        let response = request.send().await.map_err(|e| {
            tracing::warn!(%method, path, error = %e, timed_out = e.is_timeout(), "backend unreachable");
            ClientError::network(path, &e)
        })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| ClientError::network(path, &e))?;

        if status == 401 {
            tracing::warn!(path, "backend rejected credentials; clearing session");
            if let Err(e) = self.session.clear() {
                tracing::warn!(error = %e, "failed to clear session after 401");
            }
        }
        if !(200..300).contains(&status) {
            tracing::warn!(%method, path, status, "backend returned error status");
            return Err(ClientError::Remote { status, body: text });
        }
        Ok(text)
    }
}

fn parse_reply<T: DeserializeOwned>(text: &str) -> Result<T, ClientError> {
    serde_json::from_str(text).map_err(|e| ClientError::Parse(ParseError::InvalidJson(e.to_string())))
}

#[async_trait::async_trait]
impl BackendApi for HttpBackend {
    async fn health(&self) -> Result<Value, ClientError> {
        self.call(Method::GET, HEALTH_PATH, None, self.timeouts.health).await
    }

    async fn schema_from_description(
        &self,
        description: &str,
        domain: &str,
        data_type: &str,
    ) -> Result<SchemaResult, ClientError> {
        let body = json!({ "description": description, "domain": domain, "data_type": data_type });
        // Parsed straight from text so field order survives.
        let text = self.send(Method::POST, SCHEMA_PATH, Some(&body), self.timeouts.request).await?;
        parse_reply(&text)
    }

    async fn analyze(&self, sample: &Dataset, config: &Value) -> Result<Value, ClientError> {
        let body = json!({ "sample_data": sample.to_json(), "config": config });
        self.call(Method::POST, ANALYZE_PATH, Some(&body), self.timeouts.request).await
    }

    async fn start_generation(&self, body: &Value) -> Result<Value, ClientError> {
        self.call(Method::POST, START_PATH, Some(body), self.timeouts.generation).await
    }

    async fn generation_status(&self, job_id: &str) -> Result<Value, ClientError> {
        let path = format!("{STATUS_PATH}/{job_id}");
        self.call(Method::GET, &path, None, self.timeouts.request).await
    }

    async fn list_jobs(&self) -> Result<Value, ClientError> {
        self.call(Method::GET, JOBS_PATH, None, self.timeouts.request).await
    }

    async fn generate_local(&self, body: &Value) -> Result<Value, ClientError> {
        self.call(Method::POST, GENERATE_LOCAL_PATH, Some(body), self.timeouts.generation).await
    }

    async fn metrics(&self) -> Result<Value, ClientError> {
        self.call(Method::GET, METRICS_PATH, None, self.timeouts.request).await
    }

    async fn agents_status(&self) -> Result<Value, ClientError> {
        self.call(Method::GET, AGENTS_PATH, None, self.timeouts.request).await
    }
}
