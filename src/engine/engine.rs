use std::sync::Arc;
use serde::Serialize;

use crate::{
    config::EngineConfig,
    error::Result,
    metrics::{MetricsCollector, MetricsSnapshot},
    model::LifecycleManager,
    processing::{QueueStats, RequestPipeline},
    types::{AskRequest, AskResponse, ReadinessState},
};

use super::builder::EngineBuilder;

/// Process-wide service context.
///
/// Built once at start-up and shared with the transport; holds the
/// lifecycle manager, the request pipeline and the metrics collector.
pub struct AskEngine {
    pub(super) config: Arc<EngineConfig>,
    pub(super) lifecycle: Arc<LifecycleManager>,
    pub(super) pipeline: RequestPipeline,
    pub(super) metrics: Arc<MetricsCollector>,
}

impl AskEngine {
    /// Create a new engine builder
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load the model and tokenizer. Safe to call from several tasks; the load runs once.
    pub async fn initialize(&self) -> Result<()> {
        self.lifecycle.initialize().await.map(|_| ())
    }

    pub fn is_ready(&self) -> bool {
        self.lifecycle.is_ready()
    }

    pub fn readiness(&self) -> ReadinessState {
        self.lifecycle.state()
    }

    pub async fn wait_until_ready(&self) -> ReadinessState {
        self.lifecycle.wait_until_ready().await
    }

    /// Run one message through the pipeline
    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse> {
        self.pipeline.handle(request).await
    }

    /// Get the current metrics
    pub async fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot().await
    }

    /// Readiness and queue occupancy for health checks
    pub fn health(&self) -> HealthReport {
        let queue = self
            .lifecycle
            .resources()
            .ok()
            .map(|loaded| loaded.runtime.queue_stats());

        HealthReport {
            status: self.readiness().phase(),
            queue,
        }
    }
}

/// Body of the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueStats>,
}
