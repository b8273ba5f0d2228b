//! Background trace polling for evaluation reports.
//!
//! Agents export spans asynchronously, so trace-derived metrics are not
//! available when a report is written. The poller retries the trace store on a
//! fixed interval until spans appear or the attempt budget runs out, and
//! records the outcome on the stored report.
//!
//! Lifecycle per report: `idle -> polling -> found | exhausted | stopped`.
//! Found and stopped pollers are forgotten; an exhausted poller keeps its
//! state (with `running == false`) until it is restarted or stopped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;
use shared_types::{MetricsStatus, ReportUpdate};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::observability::{Span, TraceSource};
use crate::scheduler::ScheduledTask;
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_attempts: 20,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PollError {
    #[error("traces not available after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollState {
    pub report_id: String,
    pub run_id: String,
    pub interval_ms: u64,
    pub max_attempts: u32,
    pub attempts: u32,
    pub running: bool,
    pub started_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

type TracesFoundFn = Arc<dyn Fn(&[Span]) + Send + Sync>;
type AttemptFn = Arc<dyn Fn(u32, u32) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&PollError) + Send + Sync>;

/// Optional hooks invoked from the polling task
#[derive(Clone, Default)]
pub struct PollCallbacks {
    traces_found: Option<TracesFoundFn>,
    attempt: Option<AttemptFn>,
    error: Option<ErrorFn>,
}

impl PollCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_traces_found(mut self, f: impl Fn(&[Span]) + Send + Sync + 'static) -> Self {
        self.traces_found = Some(Arc::new(f));
        self
    }

    /// Called with `(attempt, max_attempts)` before each fetch.
    pub fn on_attempt(mut self, f: impl Fn(u32, u32) + Send + Sync + 'static) -> Self {
        self.attempt = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&PollError) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(f));
        self
    }
}

struct PollEntry {
    state: PollState,
    generation: u64,
    callbacks: PollCallbacks,
    timer: Option<ScheduledTask>,
}

struct PollerInner {
    storage: Arc<dyn Storage>,
    traces: Arc<dyn TraceSource>,
    defaults: PollConfig,
    polls: Mutex<HashMap<String, PollEntry>>,
    next_generation: AtomicU64,
}

#[derive(Clone)]
pub struct TracePoller {
    inner: Arc<PollerInner>,
}

impl TracePoller {
    pub fn new(
        storage: Arc<dyn Storage>,
        traces: Arc<dyn TraceSource>,
        defaults: PollConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                storage,
                traces,
                defaults,
                polls: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Start polling for `report_id`. Returns false, leaving the running poller
    /// and its configuration untouched, if one is already running.
    pub async fn start_polling(
        &self,
        report_id: &str,
        run_id: &str,
        callbacks: PollCallbacks,
        config: Option<PollConfig>,
    ) -> bool {
        let config = config.unwrap_or(self.inner.defaults);
        let mut polls = self.inner.polls.lock().await;
        if polls.get(report_id).is_some_and(|entry| entry.state.running) {
            debug!(report_id, "Trace polling already running");
            return false;
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let timer = ScheduledTask::after(
            Duration::ZERO,
            poll_tick(self.inner.clone(), report_id.to_string(), generation),
        );
        polls.insert(
            report_id.to_string(),
            PollEntry {
                state: PollState {
                    report_id: report_id.to_string(),
                    run_id: run_id.to_string(),
                    interval_ms: config.interval.as_millis() as u64,
                    max_attempts: config.max_attempts,
                    attempts: 0,
                    running: true,
                    started_at: Utc::now(),
                    last_attempt_at: None,
                },
                generation,
                callbacks,
                timer: Some(timer),
            },
        );
        info!(
            report_id,
            run_id,
            interval_ms = config.interval.as_millis() as u64,
            max_attempts = config.max_attempts,
            "Started trace polling"
        );
        true
    }

    /// Cancel the pending attempt and forget the poller. An in-flight fetch
    /// completes but its result is discarded.
    pub async fn stop_polling(&self, report_id: &str) -> bool {
        let Some(mut entry) = self.inner.polls.lock().await.remove(report_id) else {
            return false;
        };
        entry.state.running = false;
        if let Some(timer) = entry.timer.take() {
            timer.cancel();
        }
        info!(report_id, attempts = entry.state.attempts, "Stopped trace polling");
        true
    }

    pub async fn get_state(&self, report_id: &str) -> Option<PollState> {
        self.inner
            .polls
            .lock()
            .await
            .get(report_id)
            .map(|entry| entry.state.clone())
    }

    pub async fn get_all_active_polls(&self) -> Vec<PollState> {
        let polls = self.inner.polls.lock().await;
        let mut active: Vec<PollState> = polls
            .values()
            .filter(|entry| entry.state.running)
            .map(|entry| entry.state.clone())
            .collect();
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        active
    }

    pub async fn active_count(&self) -> usize {
        self.inner
            .polls
            .lock()
            .await
            .values()
            .filter(|entry| entry.state.running)
            .count()
    }
}

enum TickOutcome {
    Found(Vec<Span>),
    Exhausted(u32),
    Retry,
}

fn poll_tick(inner: Arc<PollerInner>, report_id: String, generation: u64) -> BoxFuture<'static, ()> {
    async move {
        let now = Utc::now();
        let (attempt, max_attempts, run_id, callbacks) = {
            let mut polls = inner.polls.lock().await;
            let Some(entry) = polls.get_mut(&report_id) else {
                return;
            };
            if entry.generation != generation || !entry.state.running {
                return;
            }
            entry.state.attempts += 1;
            entry.state.last_attempt_at = Some(now);
            entry.timer = None;
            (
                entry.state.attempts,
                entry.state.max_attempts,
                entry.state.run_id.clone(),
                entry.callbacks.clone(),
            )
        };

        if let Some(on_attempt) = &callbacks.attempt {
            on_attempt(attempt, max_attempts);
        }
        let progress = ReportUpdate {
            trace_fetch_attempts: Some(attempt),
            last_trace_fetch_at: Some(now),
            ..Default::default()
        };
        if let Err(err) = inner.storage.update_report(&report_id, &progress).await {
            warn!(report_id = %report_id, error = %err, "Failed to record trace fetch attempt");
        }

        let spans = match inner.traces.fetch_spans(&run_id).await {
            Ok(spans) => spans,
            Err(err) => {
                warn!(report_id = %report_id, run_id = %run_id, error = %err, "Trace fetch failed");
                Vec::new()
            }
        };

        let outcome = {
            let mut polls = inner.polls.lock().await;
            let Some(entry) = polls.get_mut(&report_id) else {
                debug!(report_id = %report_id, "Discarding trace fetch for stopped poller");
                return;
            };
            if entry.generation != generation || !entry.state.running {
                return;
            }
            if !spans.is_empty() {
                polls.remove(&report_id);
                TickOutcome::Found(spans)
            } else if attempt >= max_attempts {
                entry.state.running = false;
                TickOutcome::Exhausted(attempt)
            } else {
                let interval = Duration::from_millis(entry.state.interval_ms);
                entry.timer = Some(ScheduledTask::after(
                    interval,
                    poll_tick(inner.clone(), report_id.clone(), generation),
                ));
                TickOutcome::Retry
            }
        };

        match outcome {
            TickOutcome::Found(spans) => {
                info!(report_id = %report_id, attempt, spans = spans.len(), "Traces found");
                if let Some(on_found) = &callbacks.traces_found {
                    on_found(&spans);
                }
                let trace_id = spans
                    .iter()
                    .find(|span| span.is_root())
                    .or_else(|| spans.first())
                    .map(|span| span.trace_id.clone());
                let update = ReportUpdate {
                    metrics_status: Some(MetricsStatus::Ready),
                    trace_error: Some(None),
                    trace_id,
                    ..Default::default()
                };
                if let Err(err) = inner.storage.update_report(&report_id, &update).await {
                    warn!(report_id = %report_id, error = %err, "Failed to mark report metrics ready");
                }
            }
            TickOutcome::Exhausted(attempts) => {
                let err = PollError::Exhausted { attempts };
                warn!(report_id = %report_id, run_id = %run_id, attempts, "Giving up on traces");
                if let Some(on_error) = &callbacks.error {
                    on_error(&err);
                }
                let update = ReportUpdate {
                    metrics_status: Some(MetricsStatus::Error),
                    trace_error: Some(Some(err.to_string())),
                    ..Default::default()
                };
                if let Err(store_err) = inner.storage.update_report(&report_id, &update).await {
                    warn!(report_id = %report_id, error = %store_err, "Failed to record trace error");
                }
            }
            TickOutcome::Retry => {
                debug!(report_id = %report_id, attempt, max_attempts, "No traces yet");
            }
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::TraceError;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use serde_json::Map;
    use shared_types::{EvaluationMetrics, EvaluationReport, PassFailStatus, ReportStatus};
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;

    /// Returns no spans until `found_after` fetches have been made.
    struct FakeTraces {
        calls: AtomicU32,
        found_after: Option<u32>,
    }

    impl FakeTraces {
        fn never() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                found_after: None,
            })
        }

        fn found_on(attempt: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                found_after: Some(attempt),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TraceSource for FakeTraces {
        async fn fetch_spans(&self, _run_id: &str) -> Result<Vec<Span>, TraceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.found_after {
                Some(n) if call >= n => Ok(vec![Span {
                    trace_id: "trace-xyz".to_string(),
                    span_id: "root".to_string(),
                    parent_span_id: None,
                    name: "invoke_agent".to_string(),
                    start_time: None,
                    end_time: None,
                    duration_ns: None,
                    status_code: None,
                    attributes: Map::new(),
                }]),
                _ => Ok(Vec::new()),
            }
        }
    }

    fn report(id: &str) -> EvaluationReport {
        EvaluationReport {
            id: id.to_string(),
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
            metrics_status: Some(MetricsStatus::Pending),
            trace_fetch_attempts: 0,
            last_trace_fetch_at: None,
            trace_error: None,
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }

    async fn setup(traces: Arc<FakeTraces>) -> (TracePoller, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        storage.save_report(&report("report-1")).await.unwrap();
        let poller = TracePoller::new(storage.clone(), traces, PollConfig::default());
        (poller, storage)
    }

    fn config(interval_secs: u64, max_attempts: u32) -> Option<PollConfig> {
        Some(PollConfig {
            interval: Duration::from_secs(interval_secs),
            max_attempts,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_error_and_keeps_state() {
        let traces = FakeTraces::never();
        let (poller, storage) = setup(traces.clone()).await;

        let attempts = Arc::new(StdMutex::new(Vec::new()));
        let errors = Arc::new(StdMutex::new(Vec::new()));
        let attempts_seen = attempts.clone();
        let errors_seen = errors.clone();
        let callbacks = PollCallbacks::new()
            .on_attempt(move |attempt, max| attempts_seen.lock().unwrap().push((attempt, max)))
            .on_error(move |err| errors_seen.lock().unwrap().push(err.to_string()));

        assert!(
            poller
                .start_polling("report-1", "agent-run-1", callbacks, config(1, 2))
                .await
        );
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(*attempts.lock().unwrap(), vec![(1, 2), (2, 2)]);
        assert_eq!(
            *errors.lock().unwrap(),
            vec!["traces not available after 2 attempts".to_string()]
        );
        assert_eq!(traces.calls(), 2);

        let state = poller.get_state("report-1").await.expect("state retained");
        assert!(!state.running);
        assert_eq!(state.attempts, 2);
        assert!(poller.get_all_active_polls().await.is_empty());

        let stored = storage.get_report("report-1").await.unwrap().unwrap();
        assert_eq!(stored.metrics_status, Some(MetricsStatus::Error));
        assert_eq!(stored.trace_fetch_attempts, 2);
        assert_eq!(
            stored.trace_error.as_deref(),
            Some("traces not available after 2 attempts")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_traces_found_marks_report_ready() {
        let traces = FakeTraces::found_on(2);
        let (poller, storage) = setup(traces.clone()).await;

        let found = Arc::new(StdMutex::new(0usize));
        let found_seen = found.clone();
        let callbacks =
            PollCallbacks::new().on_traces_found(move |spans| *found_seen.lock().unwrap() += spans.len());

        poller
            .start_polling("report-1", "agent-run-1", callbacks, config(10, 5))
            .await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(*found.lock().unwrap(), 1);
        assert_eq!(traces.calls(), 2);
        assert!(poller.get_state("report-1").await.is_none());

        let stored = storage.get_report("report-1").await.unwrap().unwrap();
        assert_eq!(stored.metrics_status, Some(MetricsStatus::Ready));
        assert_eq!(stored.trace_id.as_deref(), Some("trace-xyz"));
        assert_eq!(stored.trace_error, None);
        assert_eq!(stored.trace_fetch_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_is_immediate() {
        let traces = FakeTraces::never();
        let (poller, _storage) = setup(traces.clone()).await;

        poller
            .start_polling("report-1", "agent-run-1", PollCallbacks::new(), config(30, 20))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(traces.calls(), 1);
        let state = poller.get_state("report-1").await.unwrap();
        assert_eq!(state.attempts, 1);
        assert!(state.running);
        assert!(state.last_attempt_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_start_preserves_first_config() {
        let (poller, _storage) = setup(FakeTraces::never()).await;

        assert!(
            poller
                .start_polling("report-1", "agent-run-1", PollCallbacks::new(), config(10, 5))
                .await
        );
        assert!(
            !poller
                .start_polling("report-1", "agent-run-1", PollCallbacks::new(), config(1, 2))
                .await
        );

        let state = poller.get_state("report-1").await.unwrap();
        assert_eq!(state.interval_ms, 10_000);
        assert_eq!(state.max_attempts, 5);
        assert_eq!(poller.get_all_active_polls().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_attempts() {
        let traces = FakeTraces::never();
        let (poller, _storage) = setup(traces.clone()).await;

        poller
            .start_polling("report-1", "agent-run-1", PollCallbacks::new(), config(10, 20))
            .await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(traces.calls(), 1);

        assert!(poller.stop_polling("report-1").await);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(traces.calls(), 1);
        assert!(poller.get_state("report-1").await.is_none());
        assert_eq!(poller.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_stop_unknown_is_noop() {
        let (poller, _storage) = setup(FakeTraces::never()).await;
        assert!(!poller.stop_polling("nope").await);
        assert!(poller.get_all_active_polls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_exhaustion() {
        let traces = FakeTraces::never();
        let (poller, _storage) = setup(traces.clone()).await;

        poller
            .start_polling("report-1", "agent-run-1", PollCallbacks::new(), config(1, 1))
            .await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!poller.get_state("report-1").await.unwrap().running);

        assert!(
            poller
                .start_polling("report-1", "agent-run-1", PollCallbacks::new(), config(1, 3))
                .await
        );
        let state = poller.get_state("report-1").await.unwrap();
        assert!(state.running);
        assert_eq!(state.max_attempts, 3);
    }
}
