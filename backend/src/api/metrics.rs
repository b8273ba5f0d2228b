use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use shared_types::{BatchMetricsRequest, BatchMetricsResponse, RunMetrics};

use crate::api::error::{ApiError, ApiResult};
use crate::api::{parse_body, ApiState};
use crate::app_state::AppState;
use crate::observability::{batch_metrics, run_metrics, TraceSource};

const MAX_BATCH_RUNS: usize = 100;

pub(crate) fn require_trace_source(state: &AppState) -> ApiResult<Arc<dyn TraceSource>> {
    state.trace_source().cloned().ok_or_else(|| {
        ApiError::Configuration(
            "observability is not configured; set OPENSEARCH_LOGS_ENDPOINT".to_string(),
        )
    })
}

/// GET /api/metrics/{run_id}
pub async fn get_run_metrics(
    State(api): State<ApiState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RunMetrics>> {
    let source = require_trace_source(&api.app_state)?;
    let metrics = run_metrics(source.as_ref(), api.app_state.catalog(), &run_id).await?;
    Ok(Json(metrics))
}

/// POST /api/metrics/batch
pub async fn get_batch_metrics(
    State(api): State<ApiState>,
    body: Result<Json<BatchMetricsRequest>, JsonRejection>,
) -> ApiResult<Json<BatchMetricsResponse>> {
    let request = parse_body(body)?;
    if request.run_ids.is_empty() {
        return Err(ApiError::validation("runIds must be a non-empty array"));
    }
    if request.run_ids.len() > MAX_BATCH_RUNS {
        return Err(ApiError::validation(format!(
            "runIds accepts at most {MAX_BATCH_RUNS} entries"
        )));
    }
    let source = require_trace_source(&api.app_state)?;
    Ok(Json(
        batch_metrics(source.as_ref(), api.app_state.catalog(), &request.run_ids).await,
    ))
}
