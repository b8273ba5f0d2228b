use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use shared_types::{
    new_id, CompletedPayload, EvaluateRequest, StartedTestCase, StepEvent, StreamEvent,
    TrajectoryStep,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::sse::event_stream_response;
use crate::api::{parse_body, required, ApiState};
use crate::config::validate_endpoint;
use crate::evaluation::EvaluationContext;
use crate::executor::{start_trace_polling, EventSink};

/// POST /api/evaluate
///
/// Evaluates one test case (stored or inline) and streams `started`, `step`
/// events and `completed { reportId, report }` or `error`.
pub async fn evaluate(
    State(api): State<ApiState>,
    body: Result<Json<EvaluateRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let state = api.app_state;
    let request = parse_body(body)?;

    let agent_key = required(request.agent_key, "agentKey")?;
    let model_id = required(request.model_id, "modelId")?;
    let agent = state
        .catalog()
        .agent(&agent_key)
        .cloned()
        .ok_or_else(|| ApiError::validation(format!("unknown agent: {agent_key}")))?;
    let model = state
        .catalog()
        .model(&model_id)
        .cloned()
        .ok_or_else(|| ApiError::validation(format!("unknown model: {model_id}")))?;

    let agent_endpoint = match request.agent_endpoint.as_deref() {
        Some(raw) => Some(
            validate_endpoint("agentEndpoint", raw)
                .map_err(|err| ApiError::validation(err.to_string()))?,
        ),
        None => None,
    };

    let test_case = match (request.test_case_id, request.test_case) {
        (Some(id), _) => state
            .storage()
            .get_test_case(&id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("test case not found: {id}")))?,
        (None, Some(inline)) => inline,
        (None, None) => {
            return Err(ApiError::validation("testCaseId or testCase is required"));
        }
    };

    let report_id = new_id("report");
    let (sink, rx) = EventSink::channel();

    tokio::spawn(async move {
        sink.send(StreamEvent::Started {
            run_id: report_id.clone(),
            test_cases: vec![StartedTestCase {
                id: test_case.id.clone(),
                name: test_case.name.clone(),
            }],
        });

        let ctx = EvaluationContext {
            report_id: report_id.clone(),
            agent_endpoint,
            ..Default::default()
        };
        let on_step = |step: &TrajectoryStep| {
            sink.send(StreamEvent::Step(StepEvent {
                test_case_id: test_case.id.clone(),
                step: step.clone(),
            }));
        };

        let report = match state
            .evaluator()
            .evaluate(&test_case, &agent, &model, &ctx, &on_step)
            .await
        {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(report_id = %report_id, error = %err, "Evaluation failed");
                sink.send(StreamEvent::Error {
                    error: err.to_string(),
                });
                return;
            }
        };

        if let Err(err) = state.storage().save_report(&report).await {
            tracing::error!(report_id = %report_id, error = %err, "Failed to store report");
            sink.send(StreamEvent::Error {
                error: err.to_string(),
            });
            return;
        }
        start_trace_polling(&state, &report).await;

        sink.send(StreamEvent::Completed(CompletedPayload {
            run: None,
            report_id: Some(report.id.clone()),
            report: Some(report),
        }));
    });

    Ok(event_stream_response(rx))
}
