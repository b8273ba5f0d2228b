//! HTTP API routes for the Agent Health backend
//!
//! JSON endpoints for the catalog and stored entities, `text/event-stream`
//! endpoints for evaluations and experiment runs, and trace/metrics lookups.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use shared_types::{AgentConfig, ModelConfig};

pub mod error;
pub mod evaluate;
pub mod experiments;
pub mod metrics;
pub mod sse;
pub mod storage;
pub mod traces;

use crate::app_state::AppState;
use error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct ApiState {
    pub app_state: AppState,
}

/// Configure all API routes
pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/health", get(health_check))
        // Catalog
        .route("/api/agents", get(list_agents))
        .route("/api/models", get(list_models))
        // Single evaluation (SSE)
        .route("/api/evaluate", post(evaluate::evaluate))
        // Stored entities
        .route(
            "/api/storage/test-cases",
            get(storage::list_test_cases).post(storage::create_test_case),
        )
        .route("/api/storage/test-cases/{id}", get(storage::get_test_case))
        .route(
            "/api/storage/experiments",
            get(storage::list_experiments).post(storage::create_experiment),
        )
        .route("/api/storage/experiments/{id}", get(storage::get_experiment))
        .route(
            "/api/storage/experiments/{id}/runs",
            get(storage::list_experiment_runs),
        )
        .route(
            "/api/storage/experiments/{id}/execute",
            post(experiments::execute_experiment),
        )
        .route(
            "/api/storage/experiments/{id}/cancel",
            post(experiments::cancel_run),
        )
        .route("/api/storage/runs/{id}", get(storage::get_run))
        .route("/api/storage/reports/{id}", get(storage::get_report))
        // Trace-derived metrics
        .route("/api/metrics/batch", post(metrics::get_batch_metrics))
        .route("/api/metrics/{run_id}", get(metrics::get_run_metrics))
        // Traces and pollers
        .route("/api/traces/polls", get(traces::list_polls))
        .route(
            "/api/traces/polls/{report_id}",
            get(traces::get_poll).delete(traces::stop_poll),
        )
        .route("/api/traces/{run_id}", get(traces::get_spans))
}

/// Health check endpoint
pub async fn health_check(State(api): State<ApiState>) -> impl IntoResponse {
    let state = &api.app_state;
    let active_polls = match state.poller() {
        Some(poller) => poller.active_count().await,
        None => 0,
    };
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "agent-health",
            "version": env!("CARGO_PKG_VERSION"),
            "storage": if state.config().storage.is_some() { "opensearch" } else { "memory" },
            "observability": state.trace_source().is_some(),
            "activeRuns": state.runs().len().await,
            "activePolls": active_polls,
        })),
    )
}

pub async fn list_agents(State(api): State<ApiState>) -> Json<Vec<AgentConfig>> {
    Json(api.app_state.catalog().agents.clone())
}

pub async fn list_models(State(api): State<ApiState>) -> Json<Vec<ModelConfig>> {
    Json(api.app_state.catalog().models.clone())
}

/// Unwrap a JSON body, reporting malformed or missing bodies as validation errors.
pub(crate) fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::validation(rejection.body_text()))
}

/// A required, non-blank string field.
pub(crate) fn required(value: Option<String>, field: &str) -> ApiResult<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::validation(format!("{field} is required"))),
    }
}
