use std::sync::Arc;

use crate::catalog::AgentCatalog;
use crate::config::Config;
use crate::evaluation::{Evaluator, HttpJudge, Judge, JudgeError, RubricJudge};
use crate::observability::TraceSource;
use crate::poller::TracePoller;
use crate::registry::RunRegistry;
use crate::storage::Storage;

/// Everything request handlers and background runs share. Built once at
/// startup and handed to the router.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    catalog: AgentCatalog,
    storage: Arc<dyn Storage>,
    trace_source: Option<Arc<dyn TraceSource>>,
    runs: RunRegistry,
    poller: Option<TracePoller>,
    evaluator: Evaluator,
}

impl AppState {
    pub fn new(
        config: Config,
        catalog: AgentCatalog,
        storage: Arc<dyn Storage>,
        trace_source: Option<Arc<dyn TraceSource>>,
    ) -> Result<Self, JudgeError> {
        let judge: Arc<dyn Judge> = match &config.judge_endpoint {
            Some(endpoint) => Arc::new(HttpJudge::new(endpoint, config.agent_timeout)?),
            None => Arc::new(RubricJudge),
        };
        let poller = trace_source
            .as_ref()
            .map(|source| TracePoller::new(storage.clone(), source.clone(), config.trace_poll));
        let evaluator = Evaluator::new(judge, config.agent_timeout, poller.is_some());

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                catalog,
                storage,
                trace_source,
                runs: RunRegistry::new(),
                poller,
                evaluator,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn catalog(&self) -> &AgentCatalog {
        &self.inner.catalog
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    /// `None` when no trace store is configured.
    pub fn trace_source(&self) -> Option<&Arc<dyn TraceSource>> {
        self.inner.trace_source.as_ref()
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.inner.runs
    }

    pub fn poller(&self) -> Option<&TracePoller> {
        self.inner.poller.as_ref()
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.inner.evaluator
    }
}
