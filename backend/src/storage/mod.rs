//! Persistence for test cases, experiments, runs and reports.
//!
//! `MemoryStorage` serves development and tests; `OpenSearchStorage` writes the
//! same documents to a search cluster.

use async_trait::async_trait;
use shared_types::{EvaluationReport, Experiment, ExperimentRun, ReportUpdate, TestCase};

pub mod memory;
pub mod opensearch;

pub use memory::MemoryStorage;
pub use opensearch::OpenSearchStorage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("storage backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage backend returned {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_test_case(&self, id: &str) -> Result<Option<TestCase>, StorageError>;
    async fn list_test_cases(&self) -> Result<Vec<TestCase>, StorageError>;
    async fn save_test_case(&self, test_case: &TestCase) -> Result<(), StorageError>;

    async fn get_experiment(&self, id: &str) -> Result<Option<Experiment>, StorageError>;
    async fn list_experiments(&self) -> Result<Vec<Experiment>, StorageError>;
    async fn save_experiment(&self, experiment: &Experiment) -> Result<(), StorageError>;

    async fn get_run(&self, id: &str) -> Result<Option<ExperimentRun>, StorageError>;
    async fn list_runs(&self, experiment_id: &str) -> Result<Vec<ExperimentRun>, StorageError>;
    async fn save_run(&self, run: &ExperimentRun) -> Result<(), StorageError>;

    async fn get_report(&self, id: &str) -> Result<Option<EvaluationReport>, StorageError>;
    async fn save_report(&self, report: &EvaluationReport) -> Result<(), StorageError>;

    /// Apply a partial update and return the stored result.
    async fn update_report(
        &self,
        id: &str,
        update: &ReportUpdate,
    ) -> Result<EvaluationReport, StorageError>;
}
