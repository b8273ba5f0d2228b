//! Agent connectors.
//!
//! A connector hands a test case prompt to an agent and returns the agent's
//! trajectory and final answer. The REST wire contract is:
//!
//! ```text
//! POST <endpoint>
//! { "runId": "...", "prompt": "...", "context": [...], "modelId": "..." }
//!
//! 200 OK
//! { "runId": "...", "steps": [{ "type": "action", "content": "...", "toolName": "..." }], "response": "..." }
//! ```
//!
//! Agents are expected to tag the spans they export with `runId`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared_types::{new_id, AgentConfig, ConnectorKind, ContextItem, StepType, TrajectoryStep};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent '{0}' has no endpoint configured")]
    MissingEndpoint(String),
    #[error("agent request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("agent returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub run_id: String,
    pub prompt: String,
    pub context: Vec<ContextItem>,
    pub model_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutput {
    /// Run id the agent's spans are tagged with; `None` when it exports no traces.
    pub run_id: Option<String>,
    pub steps: Vec<TrajectoryStep>,
    pub response: String,
}

/// Receives trajectory steps as the agent produces them.
pub type StepCallback<'a> = &'a (dyn Fn(&TrajectoryStep) + Send + Sync);

#[async_trait]
pub trait AgentConnector: Send + Sync {
    /// Run the agent. Every step in the returned trajectory is passed to
    /// `on_step` first, in order, as soon as the connector has it.
    async fn run(
        &self,
        request: &AgentRequest,
        on_step: StepCallback<'_>,
    ) -> Result<AgentOutput, AgentError>;
}

/// Build the connector for a catalog agent. `endpoint_override` replaces the
/// configured endpoint of REST agents.
pub fn connector_for(
    agent: &AgentConfig,
    endpoint_override: Option<&str>,
    timeout: Duration,
) -> Result<Box<dyn AgentConnector>, AgentError> {
    match agent.connector {
        ConnectorKind::Mock => Ok(Box::new(MockAgentConnector)),
        ConnectorKind::Rest => {
            let endpoint = endpoint_override
                .or(agent.endpoint.as_deref())
                .ok_or_else(|| AgentError::MissingEndpoint(agent.key.clone()))?;
            Ok(Box::new(RestAgentConnector::new(endpoint, timeout)?))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStep {
    #[serde(rename = "type")]
    step_type: StepType,
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    tool_args: Option<serde_json::Value>,
    #[serde(default)]
    latency_ms: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    steps: Vec<WireStep>,
    #[serde(default)]
    response: String,
}

pub struct RestAgentConnector {
    endpoint: String,
    http: reqwest::Client,
}

impl RestAgentConnector {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            http,
        })
    }
}

#[async_trait]
impl AgentConnector for RestAgentConnector {
    /// The REST contract returns the whole trajectory at once, so steps are
    /// reported together when the response arrives.
    async fn run(
        &self,
        request: &AgentRequest,
        on_step: StepCallback<'_>,
    ) -> Result<AgentOutput, AgentError> {
        let response = self.http.post(&self.endpoint).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let wire: WireResponse = response.json().await?;
        let steps: Vec<TrajectoryStep> = wire
            .steps
            .into_iter()
            .map(|step| TrajectoryStep {
                id: new_id("step"),
                step_type: step.step_type,
                content: step.content,
                tool_name: step.tool_name,
                tool_args: step.tool_args,
                timestamp: Utc::now(),
                latency_ms: step.latency_ms,
            })
            .collect();
        for step in &steps {
            on_step(step);
        }
        Ok(AgentOutput {
            run_id: Some(wire.run_id.unwrap_or_else(|| request.run_id.clone())),
            steps,
            response: wire.response,
        })
    }
}

/// Built-in demo agent: answers from the supplied context without any
/// network calls and exports no traces.
pub struct MockAgentConnector;

impl MockAgentConnector {
    fn step(step_type: StepType, content: String) -> TrajectoryStep {
        TrajectoryStep {
            id: new_id("step"),
            step_type,
            content,
            tool_name: None,
            tool_args: None,
            timestamp: Utc::now(),
            latency_ms: Some(5),
        }
    }
}

#[async_trait]
impl AgentConnector for MockAgentConnector {
    async fn run(
        &self,
        request: &AgentRequest,
        on_step: StepCallback<'_>,
    ) -> Result<AgentOutput, AgentError> {
        let mut steps = Vec::with_capacity(4);
        let mut emit = |step: TrajectoryStep| {
            on_step(&step);
            steps.push(step);
        };

        let query: String = request.prompt.chars().take(80).collect();
        emit(Self::step(StepType::Thinking, format!("Analyzing: {query}")));
        let findings: Vec<String> = request
            .context
            .iter()
            .map(|item| format!("{}: {}", item.description, item.value))
            .collect();

        let mut action = Self::step(StepType::Action, "Searching supporting context".to_string());
        action.tool_name = Some("search_context".to_string());
        action.tool_args = Some(serde_json::json!({ "query": query }));
        emit(action);

        let tool_result = if findings.is_empty() {
            "No supporting context provided".to_string()
        } else {
            findings.join("\n")
        };
        emit(Self::step(StepType::ToolResult, tool_result));

        let response = if findings.is_empty() {
            format!("Unable to determine a root cause for: {}", request.prompt)
        } else {
            format!(
                "Investigated: {}\nEvidence:\n{}",
                request.prompt,
                findings.join("\n")
            )
        };

        emit(Self::step(StepType::Response, response.clone()));

        Ok(AgentOutput {
            run_id: None,
            steps,
            response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(context: Vec<ContextItem>) -> AgentRequest {
        AgentRequest {
            run_id: "agent-run-1".to_string(),
            prompt: "Why is checkout latency high?".to_string(),
            context,
            model_id: "demo-model".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_agent_trajectory_shape() {
        let seen = std::sync::Mutex::new(Vec::new());
        let on_step = |step: &TrajectoryStep| seen.lock().unwrap().push(step.id.clone());
        let output = MockAgentConnector
            .run(
                &request(vec![ContextItem {
                    description: "Logs".to_string(),
                    value: "database connection pool exhausted".to_string(),
                }]),
                &on_step,
            )
            .await
            .unwrap();
        let step_ids: Vec<String> = output.steps.iter().map(|s| s.id.clone()).collect();
        assert_eq!(*seen.lock().unwrap(), step_ids);

        let types: Vec<StepType> = output.steps.iter().map(|s| s.step_type).collect();
        assert_eq!(
            types,
            vec![
                StepType::Thinking,
                StepType::Action,
                StepType::ToolResult,
                StepType::Response
            ]
        );
        assert_eq!(output.steps[1].tool_name.as_deref(), Some("search_context"));
        assert!(output.response.contains("connection pool exhausted"));
        assert!(output.run_id.is_none());
    }

    #[test]
    fn test_rest_agent_requires_endpoint() {
        let agent = AgentConfig {
            key: "langgraph".to_string(),
            name: "LangGraph".to_string(),
            connector: ConnectorKind::Rest,
            endpoint: None,
            description: None,
        };
        let err = connector_for(&agent, None, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, AgentError::MissingEndpoint(key) if key == "langgraph"));
        assert!(connector_for(&agent, Some("http://agent.local/run"), Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_wire_response_defaults() {
        let wire: WireResponse = serde_json::from_value(serde_json::json!({
            "steps": [{ "type": "tool_result", "content": "ok" }]
        }))
        .unwrap();
        assert!(wire.run_id.is_none());
        assert_eq!(wire.steps[0].step_type, StepType::ToolResult);
        assert_eq!(wire.response, "");
    }

    #[test]
    fn test_request_wire_shape() {
        let json = serde_json::to_value(request(Vec::new())).unwrap();
        assert_eq!(json["runId"], "agent-run-1");
        assert_eq!(json["modelId"], "demo-model");
    }
}
