//! Observability: process metrics and the deterministic trace/replay log.

pub mod metrics;
pub mod trace;

pub use metrics::Metrics;
pub use trace::{TraceEvent, TraceEventInput, TraceSink};
