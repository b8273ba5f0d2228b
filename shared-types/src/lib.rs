//! Shared types between the dashboard, the backend and the client library
//!
//! These types are used by:
//! - the Agent Health backend (HTTP API, run executor, trace poller)
//! - the Rust client library that consumes execution streams
//! - the TypeScript dashboard (via ts-rs exports)
//!
//! Serializable with serde for JSON over HTTP and SSE. Wire names are camelCase.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

pub mod sse;

pub use sse::{encode_event, SseDecodeError, SseDecoder};

/// Reports at or above this accuracy are marked as passed by the rubric judge.
pub const PASS_THRESHOLD: f64 = 0.7;

pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", ulid::Ulid::new().to_string().to_lowercase())
}

// ============================================================================
// Catalog
// ============================================================================

/// How the backend talks to an agent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export_to = "generated.ts")]
pub enum ConnectorKind {
    /// Built-in demo agent, no network
    Mock,
    /// JSON request/response against `endpoint`
    Rest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct AgentConfig {
    pub key: String,
    pub name: String,
    pub connector: ConnectorKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct ModelConfig {
    pub id: String,
    pub name: String,
    /// USD per 1000 input tokens
    #[serde(default, alias = "input_cost_per_1k")]
    pub input_cost_per_1k: f64,
    /// USD per 1000 output tokens
    #[serde(default, alias = "output_cost_per_1k")]
    pub output_cost_per_1k: f64,
}

// ============================================================================
// Test cases & experiments
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct TestCase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// The question handed to the agent
    pub prompt: String,
    /// Supporting context (logs, metrics excerpts) passed along with the prompt
    #[serde(default)]
    pub context: Vec<ContextItem>,
    #[serde(default)]
    pub expected_outcomes: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct ContextItem {
    pub description: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct Experiment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub test_case_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Runs
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export_to = "generated.ts")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// Outcome of one test case inside a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct RunResult {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    pub fn pending() -> Self {
        Self {
            status: RunStatus::Pending,
            report_id: None,
            error: None,
        }
    }
}

/// One execution of an experiment against an agent + model pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct ExperimentRun {
    pub id: String,
    pub experiment_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub agent_key: String,
    pub model_id: String,
    pub status: RunStatus,
    /// test case id -> outcome
    pub results: BTreeMap<String, RunResult>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export_to = "generated.ts")]
pub enum StepType {
    Thinking,
    Action,
    ToolResult,
    Response,
}

/// A single step of an agent trajectory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct TrajectoryStep {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "unknown")]
    pub tool_args: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct EvaluationMetrics {
    pub accuracy: f64,
    pub faithfulness: f64,
    pub latency_score: f64,
    pub trajectory_alignment_score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export_to = "generated.ts")]
pub enum PassFailStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export_to = "generated.ts")]
pub enum ReportStatus {
    Completed,
    Failed,
}

/// Trace-derived metrics availability for a report
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export_to = "generated.ts")]
pub enum MetricsStatus {
    Pending,
    Ready,
    Error,
}

/// Evaluation outcome for one test case
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct EvaluationReport {
    pub id: String,
    pub test_case_id: String,
    #[serde(default)]
    pub experiment_id: Option<String>,
    #[serde(default)]
    pub experiment_run_id: Option<String>,
    pub agent_key: String,
    pub model_id: String,
    pub status: ReportStatus,
    pub pass_fail_status: PassFailStatus,
    pub metrics: EvaluationMetrics,
    #[serde(default)]
    pub trajectory: Vec<TrajectoryStep>,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub llm_judge_reasoning: String,
    /// Run id the agent tagged its spans with
    #[serde(default)]
    pub agent_run_id: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub metrics_status: Option<MetricsStatus>,
    #[serde(default)]
    pub trace_fetch_attempts: u32,
    #[serde(default)]
    pub last_trace_fetch_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trace_error: Option<String>,
    pub duration_ms: u32,
    pub timestamp: DateTime<Utc>,
}

/// Partial update applied to a stored report.
///
/// `trace_error: Some(None)` clears the stored error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportUpdate {
    pub trace_fetch_attempts: Option<u32>,
    pub last_trace_fetch_at: Option<DateTime<Utc>>,
    pub metrics_status: Option<MetricsStatus>,
    pub trace_error: Option<Option<String>>,
    pub trace_id: Option<String>,
}

impl ReportUpdate {
    pub fn apply(&self, report: &mut EvaluationReport) {
        if let Some(attempts) = self.trace_fetch_attempts {
            report.trace_fetch_attempts = attempts;
        }
        if let Some(at) = self.last_trace_fetch_at {
            report.last_trace_fetch_at = Some(at);
        }
        if let Some(status) = self.metrics_status {
            report.metrics_status = Some(status);
        }
        if let Some(error) = &self.trace_error {
            report.trace_error = error.clone();
        }
        if let Some(trace_id) = &self.trace_id {
            report.trace_id = Some(trace_id.clone());
        }
    }
}

// ============================================================================
// Execution stream events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct StartedTestCase {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct RunProgress {
    pub run_id: String,
    pub current_test_case_index: u32,
    pub total_test_cases: u32,
    pub current_test_case_id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct StepEvent {
    pub test_case_id: String,
    pub step: TrajectoryStep,
}

/// Terminal success payload. Experiment runs carry `run`; single evaluations
/// carry `report_id` and `report`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct CompletedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<ExperimentRun>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<EvaluationReport>,
}

/// Events carried by `text/event-stream` responses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(tag = "type", rename_all = "lowercase")]
#[ts(export_to = "generated.ts")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    Started {
        run_id: String,
        test_cases: Vec<StartedTestCase>,
    },
    Progress(RunProgress),
    Step(StepEvent),
    Completed(CompletedPayload),
    Error { error: String },
}

impl StreamEvent {
    pub const KNOWN_TYPES: [&'static str; 5] =
        ["started", "progress", "step", "completed", "error"];

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Completed(_) | StreamEvent::Error { .. })
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            StreamEvent::Started { .. } => "started",
            StreamEvent::Progress(_) => "progress",
            StreamEvent::Step(_) => "step",
            StreamEvent::Completed(_) => "completed",
            StreamEvent::Error { .. } => "error",
        }
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct EvaluateRequest {
    #[serde(default)]
    pub agent_key: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case: Option<TestCase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct ExecuteExperimentRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub agent_key: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct CancelRunRequest {
    #[serde(default)]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct CancelRunResponse {
    pub cancelled: bool,
    pub run_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct BatchMetricsRequest {
    #[serde(default)]
    pub run_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export_to = "generated.ts")]
pub enum MetricsEntryStatus {
    Success,
    Error,
}

/// Token, cost and duration metrics computed from one run's spans
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct RunMetrics {
    pub run_id: String,
    #[serde(default)]
    pub trace_id: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub cost_usd: f64,
    pub duration_ms: f64,
    pub llm_calls: u32,
    pub tool_calls: u32,
    pub tools_used: Vec<String>,
    pub status: MetricsEntryStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct MetricsFailure {
    pub run_id: String,
    pub error: String,
    pub status: MetricsEntryStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(untagged)]
#[ts(export_to = "generated.ts")]
pub enum MetricsEntry {
    Success(RunMetrics),
    Failure(MetricsFailure),
}

impl MetricsEntry {
    pub fn run_id(&self) -> &str {
        match self {
            MetricsEntry::Success(metrics) => &metrics.run_id,
            MetricsEntry::Failure(failure) => &failure.run_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, MetricsEntry::Success(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct MetricsAggregate {
    pub total_runs: u32,
    pub total_input_tokens: u32,
    pub total_output_tokens: u32,
    pub total_tokens: u32,
    pub total_cost_usd: f64,
    pub avg_cost_usd: f64,
    pub avg_duration_ms: f64,
    pub total_llm_calls: u32,
    pub total_tool_calls: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export_to = "generated.ts")]
pub struct BatchMetricsResponse {
    pub metrics: Vec<MetricsEntry>,
    pub aggregate: Option<MetricsAggregate>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_rs::Config;

    #[test]
    fn test_new_id_prefix() {
        let id1 = new_id("run");
        let id2 = new_id("run");
        assert!(id1.starts_with("run-"));
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_stream_event_wire_shape() {
        let event = StreamEvent::Started {
            run_id: "run-1".to_string(),
            test_cases: vec![StartedTestCase {
                id: "tc-1".to_string(),
                name: "Disk full".to_string(),
            }],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "started");
        assert_eq!(json["runId"], "run-1");
        assert_eq!(json["testCases"][0]["id"], "tc-1");

        let error = serde_json::to_value(StreamEvent::Error {
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(error, serde_json::json!({"type": "error", "error": "boom"}));
    }

    #[test]
    fn test_progress_event_flattens_payload() {
        let event = StreamEvent::Progress(RunProgress {
            run_id: "run-1".to_string(),
            current_test_case_index: 0,
            total_test_cases: 2,
            current_test_case_id: "tc-1".to_string(),
            status: RunStatus::Running,
            report_id: None,
            error: None,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["totalTestCases"], 2);
        assert_eq!(json["status"], "running");
        assert!(json.get("reportId").is_none());
    }

    #[test]
    fn test_terminal_events() {
        assert!(StreamEvent::Completed(CompletedPayload::default()).is_terminal());
        assert!(StreamEvent::Error {
            error: String::new()
        }
        .is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_metrics_entry_untagged() {
        let failure: MetricsEntry = serde_json::from_value(serde_json::json!({
            "runId": "missing",
            "error": "No traces found",
            "status": "error"
        }))
        .unwrap();
        assert!(!failure.is_success());
        assert_eq!(failure.run_id(), "missing");
    }

    #[test]
    fn test_report_update_clears_trace_error() {
        let mut report = EvaluationReport {
            id: "report-1".to_string(),
            test_case_id: "tc-1".to_string(),
            experiment_id: None,
            experiment_run_id: None,
            agent_key: "demo".to_string(),
            model_id: "demo-model".to_string(),
            status: ReportStatus::Completed,
            pass_fail_status: PassFailStatus::Passed,
            metrics: EvaluationMetrics::default(),
            trajectory: Vec::new(),
            response: String::new(),
            llm_judge_reasoning: String::new(),
            agent_run_id: Some("agent-run-1".to_string()),
            trace_id: None,
            metrics_status: Some(MetricsStatus::Error),
            trace_fetch_attempts: 3,
            last_trace_fetch_at: None,
            trace_error: Some("not available".to_string()),
            duration_ms: 10,
            timestamp: Utc::now(),
        };

        ReportUpdate {
            metrics_status: Some(MetricsStatus::Ready),
            trace_error: Some(None),
            trace_id: Some("trace-abc".to_string()),
            ..Default::default()
        }
        .apply(&mut report);

        assert_eq!(report.metrics_status, Some(MetricsStatus::Ready));
        assert_eq!(report.trace_error, None);
        assert_eq!(report.trace_id.as_deref(), Some("trace-abc"));
        assert_eq!(report.trace_fetch_attempts, 3);
    }

    #[test]
    fn test_bindings_stay_under_export_dir() {
        assert_eq!(
            StreamEvent::output_path(),
            Some(std::path::PathBuf::from("generated.ts"))
        );
        assert_eq!(RunMetrics::output_path(), StreamEvent::output_path());
        let rendered = StreamEvent::export_to_string(&Config::default()).unwrap();
        assert!(rendered.contains("started"));
        assert!(rendered.contains("runId"));
    }

    /// Writes the dashboard bindings only when asked to:
    /// `TS_RS_EXPORT_DIR=../dashboard/src/types cargo test -p shared-types export_types`
    #[test]
    fn export_types() {
        if std::env::var_os("TS_RS_EXPORT_DIR").is_none() {
            return;
        }
        let config = Config::from_env();
        ConnectorKind::export(&config).unwrap();
        AgentConfig::export(&config).unwrap();
        ModelConfig::export(&config).unwrap();
        TestCase::export(&config).unwrap();
        ContextItem::export(&config).unwrap();
        Experiment::export(&config).unwrap();
        RunStatus::export(&config).unwrap();
        RunResult::export(&config).unwrap();
        ExperimentRun::export(&config).unwrap();
        StepType::export(&config).unwrap();
        TrajectoryStep::export(&config).unwrap();
        EvaluationMetrics::export(&config).unwrap();
        PassFailStatus::export(&config).unwrap();
        ReportStatus::export(&config).unwrap();
        MetricsStatus::export(&config).unwrap();
        EvaluationReport::export(&config).unwrap();
        StartedTestCase::export(&config).unwrap();
        RunProgress::export(&config).unwrap();
        StepEvent::export(&config).unwrap();
        CompletedPayload::export(&config).unwrap();
        StreamEvent::export(&config).unwrap();
        EvaluateRequest::export(&config).unwrap();
        ExecuteExperimentRequest::export(&config).unwrap();
        CancelRunRequest::export(&config).unwrap();
        CancelRunResponse::export(&config).unwrap();
        BatchMetricsRequest::export(&config).unwrap();
        MetricsEntryStatus::export(&config).unwrap();
        RunMetrics::export(&config).unwrap();
        MetricsFailure::export(&config).unwrap();
        MetricsEntry::export(&config).unwrap();
        MetricsAggregate::export(&config).unwrap();
        BatchMetricsResponse::export(&config).unwrap();
    }
}
