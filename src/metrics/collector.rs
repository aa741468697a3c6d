use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::types::{MetricsSnapshot, RequestOutcome};
use super::MAX_METRICS_HISTORY;

/// Collects per-request outcome counts and latencies
pub struct MetricsCollector {
    state: RwLock<MetricsState>,
    start_time: Instant,
}

#[derive(Debug, Default)]
struct MetricsState {
    total_requests: usize,
    succeeded: usize,
    rejected: usize,
    unavailable: usize,
    failed: usize,
    timed_out: usize,
    generated_tokens: usize,
    latencies: VecDeque<Duration>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MetricsState::default()),
            start_time: Instant::now(),
        }
    }

    /// Record one finished request
    pub async fn record_request(&self, outcome: RequestOutcome, latency: Duration) {
        let mut state = self.state.write().await;

        state.total_requests += 1;
        match outcome {
            RequestOutcome::Succeeded => state.succeeded += 1,
            RequestOutcome::Rejected => state.rejected += 1,
            RequestOutcome::Unavailable => state.unavailable += 1,
            RequestOutcome::Failed => state.failed += 1,
            RequestOutcome::TimedOut => state.timed_out += 1,
        }

        state.latencies.push_back(latency);

        // Keep history bounded
        if state.latencies.len() > MAX_METRICS_HISTORY {
            state.latencies.pop_front();
        }
    }

    pub async fn record_generated_tokens(&self, tokens: usize) {
        self.state.write().await.generated_tokens += tokens;
    }

    /// Get a snapshot of current metrics
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.read().await;

        // Calculate latency percentiles
        let mut latencies: Vec<Duration> = state.latencies.iter().copied().collect();
        latencies.sort();

        let percentile = |p: f32| -> Duration {
            if latencies.is_empty() {
                return Duration::default();
            }
            let idx = ((latencies.len() as f32 * p) as usize).min(latencies.len() - 1);
            latencies[idx]
        };

        let average_latency = if latencies.is_empty() {
            Duration::default()
        } else {
            latencies.iter().sum::<Duration>() / latencies.len() as u32
        };

        MetricsSnapshot {
            uptime: self.start_time.elapsed(),
            total_requests: state.total_requests,
            succeeded: state.succeeded,
            rejected: state.rejected,
            unavailable: state.unavailable,
            failed: state.failed,
            timed_out: state.timed_out,
            average_latency,
            p95_latency: percentile(0.95),
            p99_latency: percentile(0.99),
            generated_tokens: state.generated_tokens,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
