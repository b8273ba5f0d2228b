//! Experiment run execution.
//!
//! A run evaluates each of the experiment's test cases in order inside one
//! spawned task, streaming progress to the client that started it. The
//! cancellation token is checked before every test case; a test case already
//! being evaluated finishes normally.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use shared_types::{
    new_id, CompletedPayload, Experiment, ExperimentRun, RunProgress, RunResult, RunStatus,
    StartedTestCase, StepEvent, StreamEvent, TestCase, TrajectoryStep,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::app_state::AppState;
use crate::evaluation::EvaluationContext;
use crate::poller::PollCallbacks;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Ordered event channel for one stream. Everything after the first terminal
/// event is dropped, as are events sent after the receiver went away.
pub struct EventSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
    closed: AtomicBool,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// Returns false when the event was dropped.
    pub fn send(&self, event: StreamEvent) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if event.is_terminal() {
            self.closed.store(true, Ordering::SeqCst);
        }
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Execute `run` to a terminal state. Always ends the stream with exactly one
/// `completed` or `error` event and unregisters the run.
pub async fn run_experiment(
    state: AppState,
    experiment: Experiment,
    mut run: ExperimentRun,
    cancel: CancellationToken,
    sink: EventSink,
) {
    let run_id = run.id.clone();
    let outcome = execute(&state, &experiment, &mut run, &cancel, &sink).await;

    match outcome {
        Ok(()) => {
            state.runs().remove(&run_id).await;
            info!(run_id = %run_id, status = run.status.as_str(), "Experiment run finished");
            sink.send(StreamEvent::Completed(CompletedPayload {
                run: Some(run),
                ..Default::default()
            }));
        }
        Err(err) => {
            error!(run_id = %run_id, error = %err, "Experiment run failed");
            run.status = RunStatus::Failed;
            run.error = Some(err.to_string());
            run.completed_at = Some(Utc::now());
            if let Err(save_err) = state.storage().save_run(&run).await {
                warn!(run_id = %run_id, error = %save_err, "Failed to persist failed run");
            }
            state.runs().remove(&run_id).await;
            sink.send(StreamEvent::Error {
                error: err.to_string(),
            });
        }
    }
}

async fn execute(
    state: &AppState,
    experiment: &Experiment,
    run: &mut ExperimentRun,
    cancel: &CancellationToken,
    sink: &EventSink,
) -> Result<(), ExecutorError> {
    let agent = state
        .catalog()
        .agent(&run.agent_key)
        .cloned()
        .ok_or_else(|| ExecutorError::UnknownAgent(run.agent_key.clone()))?;
    let model = state
        .catalog()
        .model(&run.model_id)
        .cloned()
        .ok_or_else(|| ExecutorError::UnknownModel(run.model_id.clone()))?;

    let mut test_cases: Vec<(String, Option<TestCase>)> =
        Vec::with_capacity(experiment.test_case_ids.len());
    for id in &experiment.test_case_ids {
        test_cases.push((id.clone(), state.storage().get_test_case(id).await?));
    }

    run.status = RunStatus::Running;
    run.started_at = Some(Utc::now());
    for (id, _) in &test_cases {
        run.results.insert(id.clone(), RunResult::pending());
    }
    state.storage().save_run(run).await?;

    sink.send(StreamEvent::Started {
        run_id: run.id.clone(),
        test_cases: test_cases
            .iter()
            .map(|(id, tc)| StartedTestCase {
                id: id.clone(),
                name: tc.as_ref().map_or_else(|| id.clone(), |tc| tc.name.clone()),
            })
            .collect(),
    });

    let total = test_cases.len() as u32;
    let mut cancelled = false;

    for (index, (test_case_id, test_case)) in test_cases.iter().enumerate() {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        let progress = |status: RunStatus, report_id: Option<String>, error: Option<String>| {
            StreamEvent::Progress(RunProgress {
                run_id: run.id.clone(),
                current_test_case_index: index as u32,
                total_test_cases: total,
                current_test_case_id: test_case_id.clone(),
                status,
                report_id,
                error,
            })
        };
        sink.send(progress(RunStatus::Running, None, None));

        let result = match test_case {
            Some(test_case) => {
                let report_id = new_id("report");
                let ctx = EvaluationContext {
                    report_id: report_id.clone(),
                    experiment_id: Some(experiment.id.clone()),
                    experiment_run_id: Some(run.id.clone()),
                    agent_endpoint: None,
                };
                let on_step = |step: &TrajectoryStep| {
                    sink.send(StreamEvent::Step(StepEvent {
                        test_case_id: test_case_id.clone(),
                        step: step.clone(),
                    }));
                };
                match state
                    .evaluator()
                    .evaluate(test_case, &agent, &model, &ctx, &on_step)
                    .await
                {
                    Ok(report) => {
                        state.storage().save_report(&report).await?;
                        start_trace_polling(state, &report).await;
                        RunResult {
                            status: RunStatus::Completed,
                            report_id: Some(report.id),
                            error: None,
                        }
                    }
                    Err(err) => {
                        warn!(run_id = %run.id, test_case_id = %test_case_id, error = %err, "Test case failed");
                        RunResult {
                            status: RunStatus::Failed,
                            report_id: None,
                            error: Some(err.to_string()),
                        }
                    }
                }
            }
            None => RunResult {
                status: RunStatus::Failed,
                report_id: None,
                error: Some(format!("test case not found: {test_case_id}")),
            },
        };

        sink.send(progress(
            result.status,
            result.report_id.clone(),
            result.error.clone(),
        ));
        run.results.insert(test_case_id.clone(), result);
        state.storage().save_run(run).await?;
    }

    if cancelled {
        info!(run_id = %run.id, "Experiment run cancelled");
        run.status = RunStatus::Cancelled;
    } else {
        run.status = RunStatus::Completed;
    }
    run.completed_at = Some(Utc::now());
    state.storage().save_run(run).await?;
    Ok(())
}

/// Begin polling for a report's traces when its metrics are pending.
pub async fn start_trace_polling(state: &AppState, report: &shared_types::EvaluationReport) {
    let (Some(poller), Some(agent_run_id)) = (state.poller(), report.agent_run_id.as_deref())
    else {
        return;
    };
    if report.metrics_status != Some(shared_types::MetricsStatus::Pending) {
        return;
    }
    let report_id = report.id.clone();
    let callbacks = PollCallbacks::new().on_error(move |err| {
        warn!(report_id = %report_id, error = %err, "Trace metrics unavailable");
    });
    poller
        .start_polling(&report.id, agent_run_id, callbacks, None)
        .await;
}
