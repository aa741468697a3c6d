use std::time::Duration;
use serde::Serialize;

use crate::error::{EngineError, ErrorKind};

/// How a request left the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    Succeeded,
    Rejected,
    Unavailable,
    Failed,
    TimedOut,
}

impl RequestOutcome {
    pub fn of<T>(result: &Result<T, EngineError>) -> Self {
        match result {
            Ok(_) => RequestOutcome::Succeeded,
            Err(e) => match e.kind() {
                ErrorKind::Client => RequestOutcome::Rejected,
                ErrorKind::Unavailable => RequestOutcome::Unavailable,
                ErrorKind::Internal => RequestOutcome::Failed,
                ErrorKind::Timeout => RequestOutcome::TimedOut,
            },
        }
    }
}

/// Snapshot of request metrics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Time since the collector was created
    pub uptime: Duration,

    /// Total requests seen by the pipeline
    pub total_requests: usize,

    pub succeeded: usize,
    pub rejected: usize,
    pub unavailable: usize,
    pub failed: usize,
    pub timed_out: usize,

    /// Latency over the retained history window
    pub average_latency: Duration,

    /// 95th percentile latency
    pub p95_latency: Duration,

    /// 99th percentile latency
    pub p99_latency: Duration,

    /// Total tokens produced by the engine
    pub generated_tokens: usize,
}
