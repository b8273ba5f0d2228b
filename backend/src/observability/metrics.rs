//! Token, cost and duration metrics derived from a run's spans.
//!
//! Follows the OpenTelemetry GenAI semantic conventions:
//!
//! - `gen_ai.usage.input_tokens` / `gen_ai.usage.output_tokens` - token usage on LLM spans
//! - `gen_ai.request.model` (or `gen_ai.response.model`) - model name, priced via the catalog
//! - `gen_ai.operation.name = execute_tool` / `gen_ai.tool.name` - tool invocations

use futures_util::future::join_all;
use shared_types::{
    BatchMetricsResponse, MetricsAggregate, MetricsEntry, MetricsEntryStatus, MetricsFailure,
    RunMetrics,
};

use super::traces::{Span, TraceError, TraceSource};
use crate::catalog::AgentCatalog;

pub const ATTR_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
pub const ATTR_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
pub const ATTR_REQUEST_MODEL: &str = "gen_ai.request.model";
pub const ATTR_RESPONSE_MODEL: &str = "gen_ai.response.model";
pub const ATTR_OPERATION_NAME: &str = "gen_ai.operation.name";
pub const ATTR_TOOL_NAME: &str = "gen_ai.tool.name";

const LLM_OPERATIONS: &[&str] = &["chat", "text_completion", "generate_content"];

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("No traces found for run {0}")]
    NoTraces(String),
    #[error(transparent)]
    Trace(#[from] TraceError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    fn from_span(span: &Span) -> Self {
        let clamp = |v: u64| u32::try_from(v).unwrap_or(u32::MAX);
        Self {
            input_tokens: span.attr_u64(ATTR_INPUT_TOKENS).map(clamp).unwrap_or(0),
            output_tokens: span.attr_u64(ATTR_OUTPUT_TOKENS).map(clamp).unwrap_or(0),
        }
    }

    fn add(&mut self, other: TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

fn is_llm_span(span: &Span) -> bool {
    match span.attr_str(ATTR_OPERATION_NAME) {
        Some(op) => LLM_OPERATIONS.contains(&op),
        None => span.attr(ATTR_INPUT_TOKENS).is_some() || span.attr(ATTR_REQUEST_MODEL).is_some(),
    }
}

fn tool_name(span: &Span) -> Option<&str> {
    if let Some(name) = span.attr_str(ATTR_TOOL_NAME) {
        return Some(name);
    }
    (span.attr_str(ATTR_OPERATION_NAME) == Some("execute_tool")).then_some(span.name.as_str())
}

fn span_model(span: &Span) -> Option<&str> {
    span.attr_str(ATTR_REQUEST_MODEL)
        .or_else(|| span.attr_str(ATTR_RESPONSE_MODEL))
}

/// Wall-clock span of the run: latest end minus earliest start.
fn run_duration_ms(spans: &[Span]) -> f64 {
    let start = spans.iter().filter_map(|s| s.start_time).min();
    let end = spans.iter().filter_map(|s| s.end_time).max();
    if let (Some(start), Some(end)) = (start, end) {
        if end >= start {
            return (end - start).num_microseconds().unwrap_or(0) as f64 / 1000.0;
        }
    }
    spans
        .iter()
        .filter_map(|s| s.duration_ns)
        .max()
        .map(|ns| ns as f64 / 1_000_000.0)
        .unwrap_or(0.0)
}

pub fn compute_run_metrics(run_id: &str, spans: &[Span], catalog: &AgentCatalog) -> RunMetrics {
    let mut usage = TokenUsage::default();
    let mut cost_usd = 0.0;
    let mut llm_calls = 0u32;
    let mut tool_calls = 0u32;
    let mut tools_used: Vec<String> = Vec::new();

    for span in spans {
        if let Some(tool) = tool_name(span) {
            tool_calls += 1;
            if !tools_used.iter().any(|t| t == tool) {
                tools_used.push(tool.to_string());
            }
            continue;
        }
        if !is_llm_span(span) {
            continue;
        }
        llm_calls += 1;
        let span_usage = TokenUsage::from_span(span);
        usage.add(span_usage);
        if let Some(pricing) = span_model(span).and_then(|model| catalog.pricing_for(model)) {
            cost_usd += f64::from(span_usage.input_tokens) / 1000.0 * pricing.input_cost_per_1k
                + f64::from(span_usage.output_tokens) / 1000.0 * pricing.output_cost_per_1k;
        }
    }

    let trace_id = spans
        .iter()
        .find(|s| s.is_root())
        .or_else(|| spans.first())
        .map(|s| s.trace_id.clone());

    RunMetrics {
        run_id: run_id.to_string(),
        trace_id,
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        total_tokens: usage.total_tokens(),
        cost_usd,
        duration_ms: run_duration_ms(spans),
        llm_calls,
        tool_calls,
        tools_used,
        status: MetricsEntryStatus::Success,
    }
}

/// Aggregate over successful runs; `None` when there are none.
pub fn aggregate(metrics: &[&RunMetrics]) -> Option<MetricsAggregate> {
    if metrics.is_empty() {
        return None;
    }
    let total_runs = metrics.len() as u32;
    let sum_u32 = |f: fn(&RunMetrics) -> u32| {
        metrics
            .iter()
            .fold(0u32, |acc, m| acc.saturating_add(f(m)))
    };
    let total_cost_usd: f64 = metrics.iter().map(|m| m.cost_usd).sum();
    let total_duration: f64 = metrics.iter().map(|m| m.duration_ms).sum();

    Some(MetricsAggregate {
        total_runs,
        total_input_tokens: sum_u32(|m| m.input_tokens),
        total_output_tokens: sum_u32(|m| m.output_tokens),
        total_tokens: sum_u32(|m| m.total_tokens),
        total_cost_usd,
        avg_cost_usd: total_cost_usd / f64::from(total_runs),
        avg_duration_ms: total_duration / f64::from(total_runs),
        total_llm_calls: sum_u32(|m| m.llm_calls),
        total_tool_calls: sum_u32(|m| m.tool_calls),
    })
}

pub async fn run_metrics(
    source: &dyn TraceSource,
    catalog: &AgentCatalog,
    run_id: &str,
) -> Result<RunMetrics, MetricsError> {
    let spans = source.fetch_spans(run_id).await?;
    if spans.is_empty() {
        return Err(MetricsError::NoTraces(run_id.to_string()));
    }
    Ok(compute_run_metrics(run_id, &spans, catalog))
}

/// Metrics for several runs fetched concurrently. Per-run failures become
/// error entries and do not fail the batch.
pub async fn batch_metrics(
    source: &dyn TraceSource,
    catalog: &AgentCatalog,
    run_ids: &[String],
) -> BatchMetricsResponse {
    let results = join_all(
        run_ids
            .iter()
            .map(|run_id| run_metrics(source, catalog, run_id)),
    )
    .await;

    let metrics: Vec<MetricsEntry> = run_ids
        .iter()
        .zip(results)
        .map(|(run_id, result)| match result {
            Ok(metrics) => MetricsEntry::Success(metrics),
            Err(err) => {
                tracing::debug!(run_id = %run_id, error = %err, "Run metrics unavailable");
                MetricsEntry::Failure(MetricsFailure {
                    run_id: run_id.clone(),
                    error: err.to_string(),
                    status: MetricsEntryStatus::Error,
                })
            }
        })
        .collect();

    let successes: Vec<&RunMetrics> = metrics
        .iter()
        .filter_map(|entry| match entry {
            MetricsEntry::Success(m) => Some(m),
            MetricsEntry::Failure(_) => None,
        })
        .collect();
    let aggregate = aggregate(&successes);

    BatchMetricsResponse { metrics, aggregate }
}
