use std::collections::HashMap;

use async_trait::async_trait;
use shared_types::{EvaluationReport, Experiment, ExperimentRun, ReportUpdate, TestCase};
use tokio::sync::RwLock;

use super::{Storage, StorageError};

/// Process-local storage. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    test_cases: RwLock<HashMap<String, TestCase>>,
    experiments: RwLock<HashMap<String, Experiment>>,
    runs: RwLock<HashMap<String, ExperimentRun>>,
    reports: RwLock<HashMap<String, EvaluationReport>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_test_case(&self, id: &str) -> Result<Option<TestCase>, StorageError> {
        Ok(self.test_cases.read().await.get(id).cloned())
    }

    async fn list_test_cases(&self) -> Result<Vec<TestCase>, StorageError> {
        let mut items: Vec<TestCase> = self.test_cases.read().await.values().cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn save_test_case(&self, test_case: &TestCase) -> Result<(), StorageError> {
        self.test_cases
            .write()
            .await
            .insert(test_case.id.clone(), test_case.clone());
        Ok(())
    }

    async fn get_experiment(&self, id: &str) -> Result<Option<Experiment>, StorageError> {
        Ok(self.experiments.read().await.get(id).cloned())
    }

    async fn list_experiments(&self) -> Result<Vec<Experiment>, StorageError> {
        let mut items: Vec<Experiment> =
            self.experiments.read().await.values().cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn save_experiment(&self, experiment: &Experiment) -> Result<(), StorageError> {
        self.experiments
            .write()
            .await
            .insert(experiment.id.clone(), experiment.clone());
        Ok(())
    }

    async fn get_run(&self, id: &str) -> Result<Option<ExperimentRun>, StorageError> {
        Ok(self.runs.read().await.get(id).cloned())
    }

    async fn list_runs(&self, experiment_id: &str) -> Result<Vec<ExperimentRun>, StorageError> {
        let mut items: Vec<ExperimentRun> = self
            .runs
            .read()
            .await
            .values()
            .filter(|run| run.experiment_id == experiment_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn save_run(&self, run: &ExperimentRun) -> Result<(), StorageError> {
        self.runs.write().await.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn get_report(&self, id: &str) -> Result<Option<EvaluationReport>, StorageError> {
        Ok(self.reports.read().await.get(id).cloned())
    }

    async fn save_report(&self, report: &EvaluationReport) -> Result<(), StorageError> {
        self.reports
            .write()
            .await
            .insert(report.id.clone(), report.clone());
        Ok(())
    }

    async fn update_report(
        &self,
        id: &str,
        update: &ReportUpdate,
    ) -> Result<EvaluationReport, StorageError> {
        let mut reports = self.reports.write().await;
        let report = reports
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found("report", id))?;
        update.apply(report);
        Ok(report.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use shared_types::RunStatus;

    fn run(id: &str, experiment_id: &str, age_secs: i64) -> ExperimentRun {
        ExperimentRun {
            id: id.to_string(),
            experiment_id: experiment_id.to_string(),
            name: id.to_string(),
            description: None,
            agent_key: "demo".to_string(),
            model_id: "demo-model".to_string(),
            status: RunStatus::Completed,
            results: Default::default(),
            created_at: Utc::now() - Duration::seconds(age_secs),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_list_runs_filters_and_orders_newest_first() {
        let storage = MemoryStorage::new();
        storage.save_run(&run("old", "exp-1", 60)).await.unwrap();
        storage.save_run(&run("new", "exp-1", 1)).await.unwrap();
        storage.save_run(&run("other", "exp-2", 1)).await.unwrap();

        let runs = storage.list_runs("exp-1").await.unwrap();
        let ids: Vec<&str> = runs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_update_missing_report_is_not_found() {
        let storage = MemoryStorage::new();
        let err = storage
            .update_report("nope", &ReportUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { kind: "report", .. }));
    }
}
