use std::error::Error as StdError;
use std::time::Duration;

use crate::types::ReadinessState;

/// Boxed library error kept as the cause of a sanitized engine error
pub type BoxError = Box<dyn StdError + Send + Sync>;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised while loading resources or serving a request.
///
/// The `Display` output of every variant is what callers see on the wire.
/// Library causes live in `source` and are only ever logged.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid request body: {message}")]
    Validation { message: String },

    #[error("Model is not ready ({state})")]
    NotReady { state: ReadinessState },

    #[error("Tokenizer is not loaded")]
    TokenizerNotLoaded,

    #[error("Tokenizer error: {message}")]
    Tokenizer {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Inference failed: {message}")]
    Inference {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Request timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Generation queue is full ({capacity} requests waiting)")]
    QueueFull { capacity: usize },

    #[error("Initialization error: {message}")]
    Initialization {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Configuration error for {parameter}: {message}")]
    Configuration { message: String, parameter: String },
}

/// Coarse classification used by the transport to pick a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, caller must change the request
    Client,
    /// Service cannot serve right now, caller may retry later
    Unavailable,
    /// Tokenizer or model failure
    Internal,
    /// Pipeline exceeded its time budget
    Timeout,
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation {
            message: message.into(),
        }
    }

    pub fn inference(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        EngineError::Inference {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn tokenizer(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        EngineError::Tokenizer {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn initialization(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        EngineError::Initialization {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn config(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Configuration {
            message: message.into(),
            parameter: parameter.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation { .. } => ErrorKind::Client,
            EngineError::NotReady { .. }
            | EngineError::TokenizerNotLoaded
            | EngineError::QueueFull { .. } => ErrorKind::Unavailable,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::Tokenizer { .. }
            | EngineError::Inference { .. }
            | EngineError::Initialization { .. }
            | EngineError::Configuration { .. } => ErrorKind::Internal,
        }
    }

    /// Full error chain for logs. Never send this to a caller.
    pub fn report(&self) -> String {
        let mut report = self.to_string();
        let mut cause = self.source();
        while let Some(err) = cause {
            report.push_str(": ");
            report.push_str(&err.to_string());
            cause = err.source();
        }
        report
    }
}
