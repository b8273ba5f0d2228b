use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::metrics::require_trace_source;
use crate::api::ApiState;
use crate::observability::Span;
use crate::poller::{PollState, TracePoller};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpansResponse {
    pub run_id: String,
    pub spans: Vec<Span>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopPollingResponse {
    pub report_id: String,
    pub stopped: bool,
}

fn require_poller(api: &ApiState) -> ApiResult<&TracePoller> {
    api.app_state.poller().ok_or_else(|| {
        ApiError::Configuration("trace polling is disabled; observability is not configured".into())
    })
}

/// GET /api/traces/{run_id}
pub async fn get_spans(
    State(api): State<ApiState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<SpansResponse>> {
    let source = require_trace_source(&api.app_state)?;
    let spans = source.fetch_spans(&run_id).await?;
    Ok(Json(SpansResponse { run_id, spans }))
}

/// GET /api/traces/polls
pub async fn list_polls(State(api): State<ApiState>) -> ApiResult<Json<Vec<PollState>>> {
    Ok(Json(require_poller(&api)?.get_all_active_polls().await))
}

/// GET /api/traces/polls/{report_id}
pub async fn get_poll(
    State(api): State<ApiState>,
    Path(report_id): Path<String>,
) -> ApiResult<Json<PollState>> {
    require_poller(&api)?
        .get_state(&report_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no trace poller for report {report_id}")))
}

/// DELETE /api/traces/polls/{report_id}
pub async fn stop_poll(
    State(api): State<ApiState>,
    Path(report_id): Path<String>,
) -> ApiResult<Json<StopPollingResponse>> {
    let stopped = require_poller(&api)?.stop_polling(&report_id).await;
    Ok(Json(StopPollingResponse { report_id, stopped }))
}
