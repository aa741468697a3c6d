//! Qwen Ask - single-model text generation behind one HTTP route
//!
//! The crate loads a Qwen2 causal language model and its tokenizer once per
//! process, then serves `POST /qwen/ask` by rendering the caller's message
//! into a chat prompt, generating a reply on a single execution slot and
//! decoding it back to text.

use candle_core::Device;

// Public modules
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod model;
pub mod processing;
pub mod server;
pub mod types;
pub mod utils;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-exports for public API
pub use config::EngineConfig;
pub use engine::{AskEngine, EngineBuilder, HealthReport};
pub use error::{EngineError, ErrorKind, Result};
pub use metrics::MetricsCollector;
pub use types::{AskRequest, AskResponse, ReadinessState};

/// Feature detection for supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    /// Whether CUDA support is compiled in and a device answered
    pub cuda: bool,
    /// Number of detected CUDA devices
    pub cuda_devices: usize,
}

impl Features {
    /// Detect available features at runtime
    pub fn detect() -> Self {
        let cuda_devices = if candle_core::utils::cuda_is_available() {
            (0..8)
                .take_while(|&i| matches!(Device::new_cuda(i), Ok(_)))
                .count()
        } else {
            0
        };

        Self {
            cuda: cuda_devices > 0,
            cuda_devices,
        }
    }
}
