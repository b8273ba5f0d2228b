use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("run {0} is already active")]
    AlreadyRegistered(String),
    #[error("run {0} is not active")]
    NotFound(String),
}

struct ActiveRun {
    experiment_id: String,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

/// Snapshot of an in-flight run
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRunInfo {
    pub run_id: String,
    pub experiment_id: String,
    pub started_at: DateTime<Utc>,
    pub cancel_requested: bool,
}

/// In-flight experiment runs keyed by run id.
///
/// An entry lives from `register` until the executor calls `remove` on a
/// terminal state. `cancel` only trips the token; the executor observes it
/// before the next test case.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, ActiveRun>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        run_id: &str,
        experiment_id: &str,
        cancel: CancellationToken,
    ) -> Result<(), RegistryError> {
        let mut runs = self.runs.lock().await;
        if runs.contains_key(run_id) {
            return Err(RegistryError::AlreadyRegistered(run_id.to_string()));
        }
        runs.insert(
            run_id.to_string(),
            ActiveRun {
                experiment_id: experiment_id.to_string(),
                cancel,
                started_at: Utc::now(),
            },
        );
        info!(run_id, experiment_id, "Registered run");
        Ok(())
    }

    pub async fn cancel(&self, run_id: &str) -> Result<(), RegistryError> {
        let runs = self.runs.lock().await;
        let run = runs
            .get(run_id)
            .ok_or_else(|| RegistryError::NotFound(run_id.to_string()))?;
        run.cancel.cancel();
        info!(run_id, "Cancellation requested");
        Ok(())
    }

    /// Returns whether an entry was present.
    pub async fn remove(&self, run_id: &str) -> bool {
        let removed = self.runs.lock().await.remove(run_id).is_some();
        if removed {
            debug!(run_id, "Unregistered run");
        }
        removed
    }

    pub async fn is_active(&self, run_id: &str) -> bool {
        self.runs.lock().await.contains_key(run_id)
    }

    pub async fn active_runs(&self) -> Vec<ActiveRunInfo> {
        let runs = self.runs.lock().await;
        let mut active: Vec<ActiveRunInfo> = runs
            .iter()
            .map(|(run_id, run)| ActiveRunInfo {
                run_id: run_id.clone(),
                experiment_id: run.experiment_id.clone(),
                started_at: run.started_at,
                cancel_requested: run.cancel.is_cancelled(),
            })
            .collect();
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        active
    }

    pub async fn len(&self) -> usize {
        self.runs.lock().await.len()
    }
}
