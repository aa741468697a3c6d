//! Common type definitions used throughout the engine

use std::fmt;
use std::time::Duration;
use serde::{Deserialize, Serialize};

/// Ordered token ids, each a vocabulary index or the unknown-token id
pub type TokenSequence = Vec<u32>;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Ordered sequence of turns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    /// One-turn conversation holding a user message
    pub fn from_user_message(message: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::new(Role::User, message)],
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Content of the final turn, the reply when the engine echoes the prompt
    pub fn last_content(&self) -> Option<&str> {
        self.turns.last().map(|turn| turn.content.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Raw output of a generation engine.
///
/// Engines either hand back the new token ids or a structured conversation
/// whose last turn is the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutput {
    Tokens(TokenSequence),
    Conversation(Conversation),
}

/// Output of one `ModelRuntime::generate` call
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub output: EngineOutput,
    /// Time spent inside the engine, queue wait excluded
    pub elapsed: Duration,
}

/// Process-wide readiness of the model and tokenizer.
///
/// Moves strictly forward: `Uninitialized -> Loading -> Ready | Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    Uninitialized,
    Loading,
    Ready,
    Failed { reason: String },
}

impl ReadinessState {
    pub fn phase(&self) -> &'static str {
        match self {
            ReadinessState::Uninitialized => "uninitialized",
            ReadinessState::Loading => "loading",
            ReadinessState::Ready => "ready",
            ReadinessState::Failed { .. } => "failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessState::Ready)
    }

    /// Ready or Failed; no further transition will happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReadinessState::Ready | ReadinessState::Failed { .. })
    }

    fn rank(&self) -> u8 {
        match self {
            ReadinessState::Uninitialized => 0,
            ReadinessState::Loading => 1,
            ReadinessState::Ready | ReadinessState::Failed { .. } => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the one-way ordering
    pub fn can_transition_to(&self, next: &ReadinessState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

// Only the phase is printed; failure reasons may contain paths.
impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.phase())
    }
}

/// Inbound payload of the ask route
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub message: Option<String>,
}

impl AskRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

/// Success envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskResponse {
    pub message: String,
}

/// Failure envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
