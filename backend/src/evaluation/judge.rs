use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use shared_types::{
    EvaluationMetrics, PassFailStatus, StepType, TestCase, TrajectoryStep, PASS_THRESHOLD,
};

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9_]+").expect("static regex"));

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "are", "was", "were", "has", "have",
    "not", "but", "its", "into", "than", "then", "should", "would", "could", "will",
];

/// Fraction of an outcome's terms that must appear in the response.
const OUTCOME_MATCH_RATIO: f64 = 0.6;
const FAST_RESPONSE_MS: f64 = 10_000.0;
const SLOW_RESPONSE_MS: f64 = 120_000.0;

#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("judge request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("judge returned {status}: {body}")]
    Status { status: u16, body: String },
}

pub struct JudgeInput<'a> {
    pub test_case: &'a TestCase,
    pub trajectory: &'a [TrajectoryStep],
    pub response: &'a str,
    pub duration_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Judgement {
    pub metrics: EvaluationMetrics,
    pub pass_fail_status: PassFailStatus,
    #[serde(default)]
    pub reasoning: String,
}

#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, input: &JudgeInput<'_>) -> Result<Judgement, JudgeError>;
}

fn tokens(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|t| t.len() >= 3 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Keyword rubric scored locally, used when no judge service is configured.
#[derive(Debug, Default)]
pub struct RubricJudge;

impl RubricJudge {
    fn outcome_matched(outcome: &str, response_tokens: &HashSet<String>) -> bool {
        let terms = tokens(outcome);
        if terms.is_empty() {
            return true;
        }
        let hits = terms.iter().filter(|t| response_tokens.contains(*t)).count();
        hits as f64 / terms.len() as f64 >= OUTCOME_MATCH_RATIO
    }

    fn faithfulness(input: &JudgeInput<'_>, response_tokens: &HashSet<String>) -> f64 {
        if response_tokens.is_empty() {
            return 0.0;
        }
        let mut grounding = tokens(&input.test_case.prompt);
        for item in &input.test_case.context {
            grounding.extend(tokens(&item.value));
            grounding.extend(tokens(&item.description));
        }
        for step in input.trajectory {
            if step.step_type == StepType::ToolResult {
                grounding.extend(tokens(&step.content));
            }
        }
        let grounded = response_tokens
            .iter()
            .filter(|t| grounding.contains(*t))
            .count();
        grounded as f64 / response_tokens.len() as f64
    }

    fn latency_score(duration_ms: u32) -> f64 {
        let ms = f64::from(duration_ms);
        if ms <= FAST_RESPONSE_MS {
            1.0
        } else if ms >= SLOW_RESPONSE_MS {
            0.0
        } else {
            1.0 - (ms - FAST_RESPONSE_MS) / (SLOW_RESPONSE_MS - FAST_RESPONSE_MS)
        }
    }

    /// Quarter credit each for reasoning, tool use, reading tool output and
    /// ending on a response.
    fn trajectory_alignment(trajectory: &[TrajectoryStep]) -> f64 {
        let has = |kind: StepType| trajectory.iter().any(|s| s.step_type == kind);
        let ends_with_response = trajectory
            .last()
            .is_some_and(|s| s.step_type == StepType::Response);
        [
            has(StepType::Thinking),
            has(StepType::Action),
            has(StepType::ToolResult),
            ends_with_response,
        ]
        .iter()
        .filter(|ok| **ok)
        .count() as f64
            * 0.25
    }
}

#[async_trait]
impl Judge for RubricJudge {
    async fn judge(&self, input: &JudgeInput<'_>) -> Result<Judgement, JudgeError> {
        let response_tokens = tokens(input.response);
        let expected = &input.test_case.expected_outcomes;

        let missing: Vec<&str> = expected
            .iter()
            .filter(|outcome| !Self::outcome_matched(outcome, &response_tokens))
            .map(String::as_str)
            .collect();
        let accuracy = if expected.is_empty() {
            if response_tokens.is_empty() {
                0.0
            } else {
                1.0
            }
        } else {
            (expected.len() - missing.len()) as f64 / expected.len() as f64
        };

        let metrics = EvaluationMetrics {
            accuracy,
            faithfulness: Self::faithfulness(input, &response_tokens),
            latency_score: Self::latency_score(input.duration_ms),
            trajectory_alignment_score: Self::trajectory_alignment(input.trajectory),
        };
        let pass_fail_status = if accuracy >= PASS_THRESHOLD {
            PassFailStatus::Passed
        } else {
            PassFailStatus::Failed
        };

        let mut reasoning = format!(
            "Matched {}/{} expected outcomes (accuracy {:.2}, threshold {:.2}).",
            expected.len() - missing.len(),
            expected.len(),
            accuracy,
            PASS_THRESHOLD
        );
        if !missing.is_empty() {
            reasoning.push_str(&format!(" Missing: {}.", missing.join("; ")));
        }

        Ok(Judgement {
            metrics,
            pass_fail_status,
            reasoning,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JudgeRequest<'a> {
    test_case: &'a TestCase,
    trajectory: &'a [TrajectoryStep],
    response: &'a str,
    duration_ms: u32,
}

/// External judge service (`JUDGE_ENDPOINT`), typically LLM-backed.
pub struct HttpJudge {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpJudge {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, JudgeError> {
        Ok(Self {
            endpoint: endpoint.to_string(),
            http: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl Judge for HttpJudge {
    async fn judge(&self, input: &JudgeInput<'_>) -> Result<Judgement, JudgeError> {
        let body = JudgeRequest {
            test_case: input.test_case,
            trajectory: input.trajectory,
            response: input.response,
            duration_ms: input.duration_ms,
        };
        let response = self.http.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(JudgeError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }
}
