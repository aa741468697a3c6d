//! Request processing: the per-request pipeline and the generation queue

mod pipeline;
mod queue;

pub use pipeline::{PipelineConfig, RequestPipeline};
pub use queue::{GenerationQueue, QueueStats, SlotGuard};
