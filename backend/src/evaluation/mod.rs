//! Single test case evaluation: run the agent, judge the answer, build the report.

pub mod agent;
pub mod judge;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use shared_types::{
    new_id, AgentConfig, EvaluationReport, MetricsStatus, ModelConfig, ReportStatus, TestCase,
    TrajectoryStep,
};
use tracing::{info, warn};

pub use agent::{
    connector_for, AgentConnector, AgentError, AgentOutput, AgentRequest, StepCallback,
};
pub use judge::{HttpJudge, Judge, JudgeError, JudgeInput, Judgement, RubricJudge};

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("agent did not respond within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Judge(#[from] JudgeError),
}

/// Identifiers attached to the report being produced
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub report_id: String,
    pub experiment_id: Option<String>,
    pub experiment_run_id: Option<String>,
    pub agent_endpoint: Option<String>,
}

impl EvaluationContext {
    pub fn new(report_id: impl Into<String>) -> Self {
        Self {
            report_id: report_id.into(),
            ..Default::default()
        }
    }
}

pub struct Evaluator {
    judge: Arc<dyn Judge>,
    agent_timeout: Duration,
    /// Reports with an agent run id start out with pending trace metrics.
    trace_polling: bool,
}

impl Evaluator {
    pub fn new(judge: Arc<dyn Judge>, agent_timeout: Duration, trace_polling: bool) -> Self {
        Self {
            judge,
            agent_timeout,
            trace_polling,
        }
    }

    pub async fn evaluate(
        &self,
        test_case: &TestCase,
        agent: &AgentConfig,
        model: &ModelConfig,
        ctx: &EvaluationContext,
        on_step: &(dyn Fn(&TrajectoryStep) + Send + Sync),
    ) -> Result<EvaluationReport, EvaluationError> {
        let connector = connector_for(agent, ctx.agent_endpoint.as_deref(), self.agent_timeout)?;
        self.evaluate_with(connector.as_ref(), test_case, agent, model, ctx, on_step)
            .await
    }

    pub async fn evaluate_with(
        &self,
        connector: &dyn AgentConnector,
        test_case: &TestCase,
        agent: &AgentConfig,
        model: &ModelConfig,
        ctx: &EvaluationContext,
        on_step: &(dyn Fn(&TrajectoryStep) + Send + Sync),
    ) -> Result<EvaluationReport, EvaluationError> {
        let request = AgentRequest {
            run_id: new_id("agentrun"),
            prompt: test_case.prompt.clone(),
            context: test_case.context.clone(),
            model_id: model.id.clone(),
        };

        let started = Instant::now();
        let output = tokio::time::timeout(self.agent_timeout, connector.run(&request, on_step))
            .await
            .map_err(|_| EvaluationError::Timeout(self.agent_timeout))??;
        let duration_ms = u32::try_from(started.elapsed().as_millis()).unwrap_or(u32::MAX);

        let judgement = self
            .judge
            .judge(&JudgeInput {
                test_case,
                trajectory: &output.steps,
                response: &output.response,
                duration_ms,
            })
            .await?;

        let metrics_status = (self.trace_polling && output.run_id.is_some())
            .then_some(MetricsStatus::Pending);

        info!(
            report_id = %ctx.report_id,
            test_case_id = %test_case.id,
            agent = %agent.key,
            model = %model.id,
            accuracy = judgement.metrics.accuracy,
            pass_fail = ?judgement.pass_fail_status,
            duration_ms,
            "Evaluated test case"
        );
        if output.steps.is_empty() {
            warn!(report_id = %ctx.report_id, "Agent returned an empty trajectory");
        }

        Ok(EvaluationReport {
            id: ctx.report_id.clone(),
            test_case_id: test_case.id.clone(),
            experiment_id: ctx.experiment_id.clone(),
            experiment_run_id: ctx.experiment_run_id.clone(),
            agent_key: agent.key.clone(),
            model_id: model.id.clone(),
            status: ReportStatus::Completed,
            pass_fail_status: judgement.pass_fail_status,
            metrics: judgement.metrics,
            trajectory: output.steps,
            response: output.response,
            llm_judge_reasoning: judgement.reasoning,
            agent_run_id: output.run_id,
            trace_id: None,
            metrics_status,
            trace_fetch_attempts: 0,
            last_trace_fetch_at: None,
            trace_error: None,
            duration_ms,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shared_types::{ConnectorKind, ContextItem, PassFailStatus, StepType};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn agent() -> AgentConfig {
        AgentConfig {
            key: "demo".to_string(),
            name: "Demo".to_string(),
            connector: ConnectorKind::Mock,
            endpoint: None,
            description: None,
        }
    }

    fn model() -> ModelConfig {
        ModelConfig {
            id: "demo-model".to_string(),
            name: "Demo".to_string(),
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
        }
    }

    fn test_case() -> TestCase {
        TestCase {
            id: "tc-1".to_string(),
            name: "Disk pressure".to_string(),
            description: None,
            prompt: "Why are pods being evicted?".to_string(),
            context: vec![ContextItem {
                description: "Events".to_string(),
                value: "node disk pressure threshold exceeded".to_string(),
            }],
            expected_outcomes: vec!["Identifies node disk pressure".to_string()],
            labels: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_mock_agent_evaluation_forwards_steps() {
        let evaluator = Evaluator::new(Arc::new(RubricJudge), Duration::from_secs(5), true);
        let seen = Mutex::new(Vec::new());
        let on_step = |step: &TrajectoryStep| seen.lock().unwrap().push(step.id.clone());

        let mut ctx = EvaluationContext::new("report-1");
        ctx.experiment_run_id = Some("run-1".to_string());
        let report = evaluator
            .evaluate(&test_case(), &agent(), &model(), &ctx, &on_step)
            .await
            .unwrap();

        assert_eq!(report.id, "report-1");
        assert_eq!(report.experiment_run_id.as_deref(), Some("run-1"));
        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.pass_fail_status, PassFailStatus::Passed);
        let step_ids: Vec<String> = report.trajectory.iter().map(|s| s.id.clone()).collect();
        assert_eq!(*seen.lock().unwrap(), step_ids);
        // The mock agent exports no traces.
        assert_eq!(report.metrics_status, None);
    }

    struct TracedAgent;

    #[async_trait]
    impl AgentConnector for TracedAgent {
        async fn run(
            &self,
            request: &AgentRequest,
            _on_step: StepCallback<'_>,
        ) -> Result<AgentOutput, AgentError> {
            Ok(AgentOutput {
                run_id: Some(request.run_id.clone()),
                steps: Vec::new(),
                response: "node disk pressure".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_traced_agent_marks_metrics_pending() {
        let evaluator = Evaluator::new(Arc::new(RubricJudge), Duration::from_secs(5), true);
        let report = evaluator
            .evaluate_with(
                &TracedAgent,
                &test_case(),
                &agent(),
                &model(),
                &EvaluationContext::new("report-2"),
                &|_| {},
            )
            .await
            .unwrap();
        assert_eq!(report.metrics_status, Some(MetricsStatus::Pending));
        assert!(report.agent_run_id.unwrap().starts_with("agentrun-"));

        let no_polling = Evaluator::new(Arc::new(RubricJudge), Duration::from_secs(5), false);
        let report = no_polling
            .evaluate_with(
                &TracedAgent,
                &test_case(),
                &agent(),
                &model(),
                &EvaluationContext::new("report-3"),
                &|_| {},
            )
            .await
            .unwrap();
        assert_eq!(report.metrics_status, None);
    }

    struct SlowAgent;

    #[async_trait]
    impl AgentConnector for SlowAgent {
        async fn run(
            &self,
            _request: &AgentRequest,
            _on_step: StepCallback<'_>,
        ) -> Result<AgentOutput, AgentError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("timed out before completion")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_timeout() {
        let evaluator = Evaluator::new(Arc::new(RubricJudge), Duration::from_secs(1), false);
        let err = evaluator
            .evaluate_with(
                &SlowAgent,
                &test_case(),
                &agent(),
                &model(),
                &EvaluationContext::new("report-4"),
                &|_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Timeout(_)));
    }

    #[derive(Default)]
    struct StreamingAgent {
        finished: AtomicBool,
    }

    #[async_trait]
    impl AgentConnector for StreamingAgent {
        async fn run(
            &self,
            _request: &AgentRequest,
            on_step: StepCallback<'_>,
        ) -> Result<AgentOutput, AgentError> {
            let step = TrajectoryStep {
                id: "step-1".to_string(),
                step_type: StepType::Thinking,
                content: "Checking node conditions".to_string(),
                tool_name: None,
                tool_args: None,
                timestamp: Utc::now(),
                latency_ms: None,
            };
            on_step(&step);
            tokio::time::sleep(Duration::from_secs(10)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(AgentOutput {
                run_id: None,
                steps: vec![step],
                response: "node disk pressure".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_reach_caller_before_agent_returns() {
        let streaming = StreamingAgent::default();
        let evaluator = Evaluator::new(Arc::new(RubricJudge), Duration::from_secs(60), false);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let on_step = move |step: &TrajectoryStep| {
            let _ = tx.send(step.id.clone());
        };

        let (test_case, agent, model) = (test_case(), agent(), model());
        let ctx = EvaluationContext::new("report-5");
        let evaluation =
            evaluator.evaluate_with(&streaming, &test_case, &agent, &model, &ctx, &on_step);
        let observe = async {
            let step_id = rx.recv().await.expect("step forwarded");
            assert!(!streaming.finished.load(Ordering::SeqCst));
            step_id
        };

        let (report, step_id) = tokio::join!(evaluation, observe);
        let report = report.unwrap();
        assert_eq!(step_id, "step-1");
        assert_eq!(report.trajectory.len(), 1);
        assert!(streaming.finished.load(Ordering::SeqCst));
    }
}
