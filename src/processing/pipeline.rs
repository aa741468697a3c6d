// Location: src/processing/pipeline.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

use crate::{
    config::EngineConfig,
    error::{EngineError, ErrorKind, Result},
    metrics::{MetricsCollector, RequestOutcome},
    model::{ChatTemplate, LifecycleManager, LoadedResources},
    types::{AskRequest, AskResponse, Conversation, EngineOutput},
};

/// Per-request settings taken from the engine config
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_new_tokens: usize,
    pub timeout: Duration,
    pub chat_template: ChatTemplate,
    pub system_prompt: Option<String>,
}

impl From<&EngineConfig> for PipelineConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_new_tokens: config.generation.max_new_tokens,
            timeout: config.processing.request_timeout,
            chat_template: config.generation.chat_template,
            system_prompt: config.generation.system_prompt.clone(),
        }
    }
}

/// Validate -> encode -> generate -> decode for one message.
///
/// Every stage failure is returned as an [`EngineError`]; nothing is retried
/// and a failed request leaves readiness and other requests untouched.
pub struct RequestPipeline {
    lifecycle: Arc<LifecycleManager>,
    metrics: Arc<MetricsCollector>,
    config: PipelineConfig,
    next_request_id: AtomicU64,
}

impl RequestPipeline {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        metrics: Arc<MetricsCollector>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            lifecycle,
            metrics,
            config,
            next_request_id: AtomicU64::new(1),
        }
    }

    pub async fn handle(&self, request: AskRequest) -> Result<AskResponse> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let span = tracing::info_span!("ask", request_id);

        async {
            let start_time = Instant::now();
            let result = self.run(request).await;
            let latency = start_time.elapsed();

            match &result {
                Ok(_) => info!(?latency, "Response generated"),
                Err(e) if e.kind() == ErrorKind::Client => debug!(error = %e, "Request rejected"),
                Err(e) => warn!(error = %e.report(), ?latency, "Request failed"),
            }

            self.metrics.record_request(RequestOutcome::of(&result), latency).await;
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, request: AskRequest) -> Result<AskResponse> {
        let message = validate(request)?;
        // Readiness is checked before any model work
        let resources = self.lifecycle.resources()?;
        info!(chars = message.len(), "Received request with a message");

        let message = tokio::time::timeout(self.config.timeout, self.reply(&resources, message))
            .await
            .map_err(|_| EngineError::Timeout {
                duration: self.config.timeout,
            })??;

        Ok(AskResponse { message })
    }

    async fn reply(&self, resources: &LoadedResources, message: String) -> Result<String> {
        let conversation = Conversation::from_user_message(message);
        let prompt = self
            .config
            .chat_template
            .render(&conversation, self.config.system_prompt.as_deref());

        let ids = resources.tokenizer.encode(&prompt)?;
        debug!(prompt_tokens = ids.len(), "Encoded");

        let generation = resources
            .runtime
            .generate(&ids, self.config.max_new_tokens)
            .await?;
        debug!(elapsed = ?generation.elapsed, "Generated");

        match generation.output {
            EngineOutput::Tokens(tokens) => {
                self.metrics.record_generated_tokens(tokens.len()).await;
                resources.tokenizer.decode(&tokens)
            }
            // Earlier turns echo the prompt; only the last one is the reply
            EngineOutput::Conversation(turns) => turns
                .last_content()
                .map(str::to_string)
                .ok_or_else(|| EngineError::Inference {
                    message: "Engine returned an empty conversation".to_string(),
                    source: None,
                }),
        }
    }
}

/// Non-empty message after trimming, or a validation error
fn validate(request: AskRequest) -> Result<String> {
    match request.message {
        Some(message) if !message.trim().is_empty() => Ok(message.trim().to_string()),
        Some(_) => Err(EngineError::validation("message must not be empty")),
        None => Err(EngineError::validation("message is required")),
    }
}
