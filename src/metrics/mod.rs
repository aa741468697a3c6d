//! Request metrics collection

mod collector;
mod types;

pub use collector::MetricsCollector;
pub use types::{MetricsSnapshot, RequestOutcome};

// Latency samples retained for percentile computation
pub(crate) const MAX_METRICS_HISTORY: usize = 1000;
