// Location: src/config.rs

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Serialize, Deserialize};

use crate::error::{EngineError, Result};
use crate::model::ChatTemplate;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub model: ModelConfig,
    pub generation: GenerationConfig,
    pub processing: ProcessingConfig,
    pub server: ServerConfig,
    pub monitoring: MonitoringConfig,
}

/// Where model artifacts are fetched from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSource {
    /// HuggingFace Hub repository
    Hub { repo_id: String, revision: String },
    /// Local directory holding `config.json`, `tokenizer.json` and safetensors
    Local { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenizerSource {
    /// `tokenizer.json` shipped with the model
    Pretrained,
    /// Word-level JSON vocabulary `{ "token": id }`
    Vocabulary { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model artifacts location
    pub source: ModelSource,

    /// Tokenizer artifacts location
    pub tokenizer: TokenizerSource,

    /// Token ids that end generation
    pub eos_token_ids: Vec<u32>,

    /// Use CUDA device 0 when the `cuda` feature is compiled in
    pub use_cuda: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum number of new tokens per request; also the runtime ceiling
    pub max_new_tokens: usize,

    /// Temperature for sampling, 0 for greedy
    pub temperature: f64,

    /// Top-p sampling threshold
    pub top_p: Option<f64>,

    /// Repetition penalty
    pub repetition_penalty: f32,

    /// Context size for repetition penalty
    pub repeat_last_n: usize,

    /// Sampling seed
    pub seed: u64,

    /// Prompt format the model was tuned on
    pub chat_template: ChatTemplate,

    /// Optional leading system turn
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Budget for encode + generate + decode of a single request
    pub request_timeout: Duration,

    /// Requests allowed to wait for the generation slot
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path of the ask route
    pub route_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Log level
    pub log_level: LogLevel,

    /// Include file and line in log records
    pub source_location: bool,

    /// Log span close events with their busy/idle timing
    pub log_spans: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            source: ModelSource::Hub {
                repo_id: "Qwen/Qwen2.5-1.5B-Instruct".to_string(),
                revision: "main".to_string(),
            },
            tokenizer: TokenizerSource::Pretrained,
            // <|im_end|> and <|endoftext|>
            eos_token_ids: vec![151645, 151643],
            use_cuda: cfg!(feature = "cuda"),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.7,
            top_p: Some(0.8),
            repetition_penalty: 1.05,
            repeat_last_n: 64,
            seed: 299792458,
            chat_template: ChatTemplate::ChatMl,
            system_prompt: None,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            queue_capacity: 64,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            route_path: "/qwen/ask".to_string(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            source_location: false,
            log_spans: false,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl EngineConfig {
    /// Load a config from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::initialization(format!("Failed to read config file {}", path.display()), e)
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            EngineError::initialization(format!("Failed to parse config file {}", path.display()), e)
        })
    }

    pub fn validate(&self) -> Result<()> {
        // Validate model configuration
        match &self.model.source {
            ModelSource::Hub { repo_id, .. } if repo_id.trim().is_empty() => {
                return Err(EngineError::config("repo_id", "Repository id cannot be empty"));
            }
            ModelSource::Local { path } if path.as_os_str().is_empty() => {
                return Err(EngineError::config("model_path", "Model path cannot be empty"));
            }
            _ => {}
        }

        if let TokenizerSource::Vocabulary { path } = &self.model.tokenizer {
            if path.as_os_str().is_empty() {
                return Err(EngineError::config("vocab_path", "Vocabulary path cannot be empty"));
            }
            // Whitespace splitting turns ChatML markers into unknown tokens
            if self.generation.chat_template == ChatTemplate::ChatMl {
                return Err(EngineError::config(
                    "chat_template",
                    "A word-level vocabulary requires the plain template",
                ));
            }
        }

        if self.model.eos_token_ids.is_empty() {
            return Err(EngineError::config(
                "eos_token_ids",
                "At least one end-of-sequence token is required",
            ));
        }

        // Validate generation configuration
        if self.generation.max_new_tokens == 0 {
            return Err(EngineError::config("max_new_tokens", "Must be a positive integer"));
        }

        if self.generation.temperature < 0.0 {
            return Err(EngineError::config("temperature", "Temperature cannot be negative"));
        }

        if let Some(top_p) = self.generation.top_p {
            if !(top_p > 0.0 && top_p <= 1.0) {
                return Err(EngineError::config("top_p", "Top-p must be in (0, 1]"));
            }
        }

        // Validate processing configuration
        if self.processing.request_timeout.is_zero() {
            return Err(EngineError::config("request_timeout", "Timeout must be greater than zero"));
        }

        if self.processing.queue_capacity == 0 {
            return Err(EngineError::config("queue_capacity", "Queue capacity must be at least 1"));
        }

        // Validate server configuration
        if !self.server.route_path.starts_with('/') {
            return Err(EngineError::config("route_path", "Route path must start with '/'"));
        }

        Ok(())
    }
}
