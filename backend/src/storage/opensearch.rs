use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use shared_types::{EvaluationReport, Experiment, ExperimentRun, ReportUpdate, TestCase};

use super::{Storage, StorageError};
use crate::config::StorageConfig;

const SEARCH_PAGE_SIZE: usize = 1000;

/// Documents stored one per index, keyed by their `id`.
pub struct OpenSearchStorage {
    client: Client,
    config: StorageConfig,
}

impl OpenSearchStorage {
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { client, config })
    }

    fn index(&self, name: &str) -> String {
        format!("{}_{name}", self.config.index_prefix)
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.cluster.username {
            Some(user) => request.basic_auth(user, self.config.cluster.password.as_deref()),
            None => request,
        }
    }

    fn doc_url(&self, index: &str, id: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(id.as_bytes()).collect();
        format!("{}/{}/_doc/{encoded}", self.config.cluster.endpoint, self.index(index))
    }

    async fn get_doc<T: DeserializeOwned>(
        &self,
        index: &str,
        id: &str,
    ) -> Result<Option<T>, StorageError> {
        let response = self
            .with_auth(self.client.get(self.doc_url(index, id)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = checked_json(response).await?;
        match body.get("_source") {
            Some(source) => Ok(Some(serde_json::from_value(source.clone())?)),
            None => Ok(None),
        }
    }

    async fn put_doc<T: Serialize>(
        &self,
        index: &str,
        id: &str,
        doc: &T,
    ) -> Result<(), StorageError> {
        let url = format!("{}?refresh=wait_for", self.doc_url(index, id));
        let response = self
            .with_auth(self.client.put(url))
            .json(doc)
            .send()
            .await?;
        checked_json(response).await?;
        tracing::debug!(index = %self.index(index), id, "Stored document");
        Ok(())
    }

    async fn search<T: DeserializeOwned>(
        &self,
        index: &str,
        query: Value,
    ) -> Result<Vec<T>, StorageError> {
        let url = format!("{}/{}/_search", self.config.cluster.endpoint, self.index(index));
        let body = json!({
            "size": SEARCH_PAGE_SIZE,
            "query": query,
            "sort": [{ "createdAt": { "order": "desc", "unmapped_type": "date" } }],
        });
        let response = self
            .with_auth(self.client.post(url))
            .json(&body)
            .send()
            .await?;
        // Index not created yet: nothing stored.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body = checked_json(response).await?;
        sources_from_search_response(&body)
    }
}

async fn checked_json(response: reqwest::Response) -> Result<Value, StorageError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StorageError::Backend {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json::<Value>().await?)
}

pub(crate) fn sources_from_search_response<T: DeserializeOwned>(
    body: &Value,
) -> Result<Vec<T>, StorageError> {
    let hits = body
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    hits.into_iter()
        .filter_map(|hit| hit.get("_source").cloned())
        .map(|source| serde_json::from_value(source).map_err(StorageError::from))
        .collect()
}

#[async_trait]
impl Storage for OpenSearchStorage {
    async fn get_test_case(&self, id: &str) -> Result<Option<TestCase>, StorageError> {
        self.get_doc("test_cases", id).await
    }

    async fn list_test_cases(&self) -> Result<Vec<TestCase>, StorageError> {
        self.search("test_cases", json!({ "match_all": {} })).await
    }

    async fn save_test_case(&self, test_case: &TestCase) -> Result<(), StorageError> {
        self.put_doc("test_cases", &test_case.id, test_case).await
    }

    async fn get_experiment(&self, id: &str) -> Result<Option<Experiment>, StorageError> {
        self.get_doc("experiments", id).await
    }

    async fn list_experiments(&self) -> Result<Vec<Experiment>, StorageError> {
        self.search("experiments", json!({ "match_all": {} })).await
    }

    async fn save_experiment(&self, experiment: &Experiment) -> Result<(), StorageError> {
        self.put_doc("experiments", &experiment.id, experiment).await
    }

    async fn get_run(&self, id: &str) -> Result<Option<ExperimentRun>, StorageError> {
        self.get_doc("runs", id).await
    }

    async fn list_runs(&self, experiment_id: &str) -> Result<Vec<ExperimentRun>, StorageError> {
        self.search(
            "runs",
            json!({ "term": { "experimentId.keyword": experiment_id } }),
        )
        .await
    }

    async fn save_run(&self, run: &ExperimentRun) -> Result<(), StorageError> {
        self.put_doc("runs", &run.id, run).await
    }

    async fn get_report(&self, id: &str) -> Result<Option<EvaluationReport>, StorageError> {
        self.get_doc("reports", id).await
    }

    async fn save_report(&self, report: &EvaluationReport) -> Result<(), StorageError> {
        self.put_doc("reports", &report.id, report).await
    }

    async fn update_report(
        &self,
        id: &str,
        update: &ReportUpdate,
    ) -> Result<EvaluationReport, StorageError> {
        let mut report: EvaluationReport = self
            .get_doc("reports", id)
            .await?
            .ok_or_else(|| StorageError::not_found("report", id))?;
        update.apply(&mut report);
        self.put_doc("reports", id, &report).await?;
        Ok(report)
    }
}
