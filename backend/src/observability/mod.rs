//! Trace store access and trace-derived run metrics.

pub mod metrics;
pub mod traces;

pub use metrics::{batch_metrics, run_metrics, MetricsError};
pub use traces::{OpenSearchTraceSource, Span, TraceError, TraceSource};
