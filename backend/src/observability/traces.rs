//! Span retrieval from the trace store.
//!
//! Agents tag every span they emit with their run id. Spans land in an
//! OpenSearch index in Data Prepper's layout, where attribute keys are
//! flattened to `span.attributes.<key>` with `.` replaced by `@`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::ObservabilityConfig;

const SPAN_ATTRIBUTE_PREFIX: &str = "span.attributes.";
const MAX_SPANS_PER_RUN: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("trace store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("trace store returned {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("malformed span document: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ns: Option<u64>,
    pub status_code: Option<String>,
    /// Attribute keys in dotted form, e.g. `gen_ai.usage.input_tokens`
    pub attributes: Map<String, Value>,
}

impl Span {
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attr(key).and_then(Value::as_str)
    }

    /// Numeric attribute, accepting numbers encoded as strings.
    pub fn attr_u64(&self, key: &str) -> Option<u64> {
        match self.attr(key)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// Parse a Data Prepper span document (`_source` of a search hit).
    pub fn from_document(doc: &Value) -> Result<Self, TraceError> {
        let obj = doc
            .as_object()
            .ok_or_else(|| TraceError::Malformed("span document is not an object".into()))?;

        let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);
        let time = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|t| t.with_timezone(&Utc))
        };

        let trace_id = text("traceId")
            .ok_or_else(|| TraceError::Malformed("span without traceId".into()))?;
        let span_id =
            text("spanId").ok_or_else(|| TraceError::Malformed("span without spanId".into()))?;

        let mut attributes = Map::new();
        if let Some(Value::Object(nested)) = obj.get("attributes") {
            for (key, value) in nested {
                attributes.insert(key.replace('@', "."), value.clone());
            }
        }
        for (key, value) in obj {
            if let Some(attr) = key.strip_prefix(SPAN_ATTRIBUTE_PREFIX) {
                attributes.insert(attr.replace('@', "."), value.clone());
            }
        }

        let status_code = obj.get("status.code").or_else(|| {
            obj.get("status")
                .and_then(Value::as_object)
                .and_then(|status| status.get("code"))
        });

        Ok(Self {
            trace_id,
            span_id,
            parent_span_id: text("parentSpanId").filter(|id| !id.is_empty()),
            name: text("name").unwrap_or_default(),
            start_time: time("startTime"),
            end_time: time("endTime"),
            duration_ns: obj.get("durationInNanos").and_then(Value::as_u64),
            status_code: status_code.map(|code| match code {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            attributes,
        })
    }
}

/// Source of spans for an agent run
#[async_trait]
pub trait TraceSource: Send + Sync {
    /// Spans tagged with `run_id`, oldest first. Empty when none are indexed yet.
    async fn fetch_spans(&self, run_id: &str) -> Result<Vec<Span>, TraceError>;
}

pub struct OpenSearchTraceSource {
    client: Client,
    config: ObservabilityConfig,
}

impl OpenSearchTraceSource {
    pub fn new(config: ObservabilityConfig) -> Result<Self, TraceError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { client, config })
    }

    fn search_body(&self, run_id: &str) -> Value {
        let field = self.config.run_id_field.clone();
        json!({
            "size": MAX_SPANS_PER_RUN,
            "query": { "term": { field: run_id } },
            "sort": [{ "startTime": { "order": "asc", "unmapped_type": "date" } }],
        })
    }
}

#[async_trait]
impl TraceSource for OpenSearchTraceSource {
    async fn fetch_spans(&self, run_id: &str) -> Result<Vec<Span>, TraceError> {
        let url = format!(
            "{}/{}/_search",
            self.config.cluster.endpoint, self.config.traces_index
        );
        let mut request = self.client.post(url).json(&self.search_body(run_id));
        if let Some(user) = &self.config.cluster.username {
            request = request.basic_auth(user, self.config.cluster.password.as_deref());
        }
        let response = request.send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(TraceError::Backend {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: Value = response.json().await?;
        let spans = spans_from_search_response(&body)?;
        tracing::debug!(run_id, count = spans.len(), "Fetched spans");
        Ok(spans)
    }
}

pub(crate) fn spans_from_search_response(body: &Value) -> Result<Vec<Span>, TraceError> {
    body.pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| hit.get("_source"))
                .map(Span::from_document)
                .collect()
        })
        .unwrap_or_else(|| Ok(Vec::new()))
}
