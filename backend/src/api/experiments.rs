//! Experiment execution and cancellation.

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use shared_types::{
    new_id, CancelRunRequest, CancelRunResponse, ExecuteExperimentRequest, ExperimentRun,
    RunStatus,
};
use tokio_util::sync::CancellationToken;

use crate::api::error::{ApiError, ApiResult};
use crate::api::sse::event_stream_response;
use crate::api::{parse_body, required, ApiState};
use crate::executor::{run_experiment, EventSink};

/// POST /api/storage/experiments/{id}/execute
///
/// Starts a run and streams `started`, `progress`, `step` and finally
/// `completed` or `error`. The run keeps going if the client disconnects.
pub async fn execute_experiment(
    State(api): State<ApiState>,
    Path(experiment_id): Path<String>,
    body: Result<Json<ExecuteExperimentRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let state = api.app_state;
    let experiment = state
        .storage()
        .get_experiment(&experiment_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("experiment not found: {experiment_id}")))?;

    let request = parse_body(body)?;
    let name = required(request.name, "name")?;
    let agent_key = required(request.agent_key, "agentKey")?;
    let model_id = required(request.model_id, "modelId")?;
    if state.catalog().agent(&agent_key).is_none() {
        return Err(ApiError::validation(format!("unknown agent: {agent_key}")));
    }
    if state.catalog().model(&model_id).is_none() {
        return Err(ApiError::validation(format!("unknown model: {model_id}")));
    }

    let run = ExperimentRun {
        id: new_id("run"),
        experiment_id: experiment.id.clone(),
        name,
        description: request.description,
        agent_key,
        model_id,
        status: RunStatus::Pending,
        results: BTreeMap::new(),
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        error: None,
    };
    state.storage().save_run(&run).await?;

    let cancel = CancellationToken::new();
    state
        .runs()
        .register(&run.id, &experiment.id, cancel.clone())
        .await?;
    tracing::info!(
        run_id = %run.id,
        experiment_id = %experiment.id,
        agent = %run.agent_key,
        model = %run.model_id,
        "Starting experiment run"
    );

    let (sink, rx) = EventSink::channel();
    tokio::spawn(run_experiment(state, experiment, run, cancel, sink));
    Ok(event_stream_response(rx))
}

/// POST /api/storage/experiments/{id}/cancel
pub async fn cancel_run(
    State(api): State<ApiState>,
    Path(experiment_id): Path<String>,
    body: Result<Json<CancelRunRequest>, JsonRejection>,
) -> ApiResult<Json<CancelRunResponse>> {
    let request = parse_body(body)?;
    let run_id = required(request.run_id, "runId")?;
    api.app_state.runs().cancel(&run_id).await?;
    tracing::info!(run_id = %run_id, experiment_id = %experiment_id, "Cancel requested via API");
    Ok(Json(CancelRunResponse {
        cancelled: true,
        run_id,
    }))
}
