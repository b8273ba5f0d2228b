//! Agent Health client
//!
//! Thin `reqwest` wrapper over the backend HTTP API. Streaming endpoints are
//! read with [`read_run_stream`], which hands intermediate events to a
//! [`RunEventHandler`] and returns the final payload.

pub mod error;
pub mod stream;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use shared_types::{
    BatchMetricsResponse, CancelRunResponse, CompletedPayload, EvaluateRequest,
    ExecuteExperimentRequest, ExperimentRun, RunMetrics,
};

pub use error::ClientError;
pub use stream::{read_run_stream, IgnoreEvents, RunEventHandler};

#[derive(Debug, Clone)]
pub struct EvalClient {
    base_url: String,
    http: reqwest::Client,
}

impl EvalClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Run a single evaluation; the payload carries `reportId` and `report`.
    pub async fn evaluate<H>(
        &self,
        request: &EvaluateRequest,
        handler: &mut H,
    ) -> Result<CompletedPayload, ClientError>
    where
        H: RunEventHandler + ?Sized,
    {
        let response = self
            .http
            .post(self.url("/api/evaluate"))
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;
        read_run_stream(response.bytes_stream(), handler).await
    }

    /// Execute an experiment and wait for the finished run.
    pub async fn execute_experiment<H>(
        &self,
        experiment_id: &str,
        request: &ExecuteExperimentRequest,
        handler: &mut H,
    ) -> Result<ExperimentRun, ClientError>
    where
        H: RunEventHandler + ?Sized,
    {
        let response = self
            .http
            .post(self.url(&format!("/api/storage/experiments/{experiment_id}/execute")))
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;
        let payload = read_run_stream(response.bytes_stream(), handler).await?;
        payload.run.ok_or(ClientError::MissingResult)
    }

    pub async fn cancel_run(
        &self,
        experiment_id: &str,
        run_id: &str,
    ) -> Result<CancelRunResponse, ClientError> {
        let response = self
            .http
            .post(self.url(&format!("/api/storage/experiments/{experiment_id}/cancel")))
            .json(&json!({ "runId": run_id }))
            .send()
            .await?;
        json_body(response).await
    }

    pub async fn run_metrics(&self, run_id: &str) -> Result<RunMetrics, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("/api/metrics/{run_id}")))
            .send()
            .await?;
        json_body(response).await
    }

    pub async fn batch_metrics(
        &self,
        run_ids: &[String],
    ) -> Result<BatchMetricsResponse, ClientError> {
        let response = self
            .http
            .post(self.url("/api/metrics/batch"))
            .json(&json!({ "runIds": run_ids }))
            .send()
            .await?;
        json_body(response).await
    }
}

async fn json_body<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let response = check_status(response).await?;
    Ok(response.json().await?)
}

/// Map non-2xx responses to [`ClientError::Http`], preferring the `{error}` field.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Http {
        status: status.as_u16(),
        message: error_message(&body, status.canonical_reason()),
    })
}

fn error_message(body: &str, reason: Option<&str>) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if let Some(error) = json.get("error").and_then(Value::as_str) {
            return error.to_string();
        }
        if let Some(message) = json.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
    }
    let body = body.trim();
    if body.is_empty() {
        reason.unwrap_or("request failed").to_string()
    } else {
        body.to_string()
    }
}
