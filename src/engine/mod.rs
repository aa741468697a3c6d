//! Engine module providing the service context shared with the transport

mod builder;
mod engine;

pub use builder::EngineBuilder;
pub use engine::{AskEngine, HealthReport};
