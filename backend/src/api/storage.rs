//! CRUD endpoints for stored test cases, experiments, runs and reports.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use shared_types::{
    new_id, ContextItem, EvaluationReport, Experiment, ExperimentRun, TestCase,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::{parse_body, required, ApiState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTestCase {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub context: Vec<ContextItem>,
    #[serde(default)]
    pub expected_outcomes: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExperiment {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub test_case_ids: Vec<String>,
}

pub async fn list_test_cases(State(api): State<ApiState>) -> ApiResult<Json<Vec<TestCase>>> {
    Ok(Json(api.app_state.storage().list_test_cases().await?))
}

pub async fn get_test_case(
    State(api): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TestCase>> {
    api.app_state
        .storage()
        .get_test_case(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("test case not found: {id}")))
}

pub async fn create_test_case(
    State(api): State<ApiState>,
    body: Result<Json<NewTestCase>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TestCase>)> {
    let input = parse_body(body)?;
    let test_case = TestCase {
        id: new_id("tc"),
        name: required(input.name, "name")?,
        description: input.description,
        prompt: required(input.prompt, "prompt")?,
        context: input.context,
        expected_outcomes: input.expected_outcomes,
        labels: input.labels,
        created_at: Utc::now(),
    };
    api.app_state.storage().save_test_case(&test_case).await?;
    tracing::info!(test_case_id = %test_case.id, "Created test case");
    Ok((StatusCode::CREATED, Json(test_case)))
}

pub async fn list_experiments(State(api): State<ApiState>) -> ApiResult<Json<Vec<Experiment>>> {
    Ok(Json(api.app_state.storage().list_experiments().await?))
}

pub async fn get_experiment(
    State(api): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Experiment>> {
    api.app_state
        .storage()
        .get_experiment(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("experiment not found: {id}")))
}

pub async fn create_experiment(
    State(api): State<ApiState>,
    body: Result<Json<NewExperiment>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Experiment>)> {
    let input = parse_body(body)?;
    let name = required(input.name, "name")?;
    if input.test_case_ids.is_empty() {
        return Err(ApiError::validation("testCaseIds must not be empty"));
    }
    let storage = api.app_state.storage();
    for id in &input.test_case_ids {
        if storage.get_test_case(id).await?.is_none() {
            return Err(ApiError::validation(format!("unknown test case: {id}")));
        }
    }

    let experiment = Experiment {
        id: new_id("exp"),
        name,
        description: input.description,
        test_case_ids: input.test_case_ids,
        created_at: Utc::now(),
    };
    storage.save_experiment(&experiment).await?;
    tracing::info!(
        experiment_id = %experiment.id,
        test_cases = experiment.test_case_ids.len(),
        "Created experiment"
    );
    Ok((StatusCode::CREATED, Json(experiment)))
}

pub async fn list_experiment_runs(
    State(api): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ExperimentRun>>> {
    Ok(Json(api.app_state.storage().list_runs(&id).await?))
}

pub async fn get_run(
    State(api): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExperimentRun>> {
    api.app_state
        .storage()
        .get_run(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("run not found: {id}")))
}

pub async fn get_report(
    State(api): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EvaluationReport>> {
    api.app_state
        .storage()
        .get_report(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("report not found: {id}")))
}
