//! Model module providing engine, tokenizer and lifecycle management

mod loader;
mod manager;
mod qwen;
mod runtime;
mod template;
mod tokenizer;

// Re-export core types and traits
pub use loader::{FileLocator, ModelLoader, QwenLoader};
pub use manager::{LifecycleManager, LoadedResources, RuntimeLimits};
pub use qwen::QwenEngine;
pub use runtime::{GenerationEngine, ModelRuntime};
pub use template::ChatTemplate;
pub use tokenizer::{
    PretrainedTokenizer, TextTokenizer, VocabTokenizer, DEFAULT_UNKNOWN_ID, UNKNOWN_TOKEN,
};

#[cfg(test)]
pub(crate) use manager::tests as test_support;
