use std::sync::Arc;
use crate::{
    config::EngineConfig,
    error::Result,
    metrics::MetricsCollector,
    model::{LifecycleManager, ModelLoader, QwenLoader, RuntimeLimits},
    processing::{PipelineConfig, RequestPipeline},
};

use super::engine::AskEngine;

/// Builder for constructing an AskEngine instance
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    loader: Option<Arc<dyn ModelLoader>>,
}

impl EngineBuilder {
    /// Create a new builder instance
    pub fn new() -> Self {
        Self {
            config: None,
            loader: None,
        }
    }

    /// Set the engine configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the default Qwen loader
    pub fn with_loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Build the engine instance. Nothing is loaded until `initialize`.
    pub fn build(self) -> Result<AskEngine> {
        // Get configuration or use default
        let config = self.config.unwrap_or_default();

        // Validate configuration
        config.validate()?;

        let config = Arc::new(config);
        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(QwenLoader::new(config.clone())));

        let lifecycle = Arc::new(LifecycleManager::new(
            loader,
            RuntimeLimits {
                max_new_tokens: config.generation.max_new_tokens,
                queue_capacity: config.processing.queue_capacity,
            },
        ));
        let metrics = Arc::new(MetricsCollector::new());
        let pipeline = RequestPipeline::new(
            lifecycle.clone(),
            metrics.clone(),
            PipelineConfig::from(config.as_ref()),
        );

        Ok(AskEngine {
            config,
            lifecycle,
            pipeline,
            metrics,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_builder_default() {
        let engine = EngineBuilder::default().build();
        assert!(engine.is_ok());
    }

    #[test]
    fn test_builder_validation() {
        let mut config = EngineConfig::default();
        config.generation.max_new_tokens = 0;

        let result = EngineBuilder::new().with_config(config).build();
        assert!(matches!(result, Err(EngineError::Configuration { .. })));
    }
}
