// Location: src/model/runtime.rs

use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::{
    error::{EngineError, Result},
    processing::{GenerationQueue, QueueStats},
    types::{EngineOutput, GenerationResult},
};

/// The opaque inference engine.
///
/// Implementations need not be reentrant: [`ModelRuntime`] never has more
/// than one `generate` call in flight.
#[async_trait::async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Generate at most `max_new_tokens` tokens following `prompt`.
    /// Stopping early at end-of-sequence is not an error.
    async fn generate(&self, prompt: &[u32], max_new_tokens: usize) -> Result<EngineOutput>;

    /// Human readable engine name for logs
    fn name(&self) -> &str {
        "engine"
    }
}

/// Shared, read-only handle to the loaded engine
pub struct ModelRuntime {
    engine: Arc<dyn GenerationEngine>,
    queue: GenerationQueue,
    max_new_tokens: usize,
}

impl ModelRuntime {
    pub fn new(engine: Arc<dyn GenerationEngine>, max_new_tokens: usize, queue_capacity: usize) -> Self {
        Self {
            engine,
            queue: GenerationQueue::new(queue_capacity),
            max_new_tokens,
        }
    }

    /// Ceiling enforced on every call
    pub fn max_new_tokens(&self) -> usize {
        self.max_new_tokens
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Run the engine over `ids` while holding the generation slot
    pub async fn generate(&self, ids: &[u32], max_new_tokens: usize) -> Result<GenerationResult> {
        if ids.is_empty() {
            return Err(EngineError::Inference {
                message: "Prompt produced no tokens".to_string(),
                source: None,
            });
        }

        if max_new_tokens == 0 || max_new_tokens > self.max_new_tokens {
            return Err(EngineError::config(
                "max_new_tokens",
                format!("Must be between 1 and {}", self.max_new_tokens),
            ));
        }

        let _slot = self.queue.acquire().await?;
        debug!(engine = self.engine.name(), prompt_tokens = ids.len(), "Generation slot acquired");

        let start_time = Instant::now();
        let output = match self.engine.generate(ids, max_new_tokens).await? {
            EngineOutput::Tokens(mut tokens) => {
                if tokens.len() > max_new_tokens {
                    debug!(returned = tokens.len(), max_new_tokens, "Truncating engine output");
                    tokens.truncate(max_new_tokens);
                }
                EngineOutput::Tokens(tokens)
            }
            conversation => conversation,
        };

        Ok(GenerationResult {
            output,
            elapsed: start_time.elapsed(),
        })
    }
}
