//! Pacing, per-display capture loops and the multi-display pipeline

pub mod capture_loop;
pub mod limiter;
pub mod streaming;

pub use capture_loop::{CaptureLoop, LoopOutcome, LoopState, LoopStats, TickOutcome};
pub use limiter::{FrameLimiter, WaitReport};
pub use streaming::{CancellationToken, StreamingConfig, StreamingPipeline, StreamingPipelineBuilder};
