//! Streaming orchestrator and conversation state
//!
//! Runs the per-request pipeline: intent analysis concurrent with history
//! loading, retrieval when the plan calls for it, quality analysis,
//! streamed generation, an optional single review pass, and persistence.
//! Reasoning steps and tokens travel as tagged frames on a bounded
//! broadcast stream; identical in-flight requests coalesce onto one
//! execution.

mod dedup;
mod history;
mod orchestrator;
mod steps;

pub use dedup::DedupTable;
pub use history::HistoryShaper;
pub use orchestrator::{Orchestrator, OrchestratorDeps};
pub use steps::{FrameSink, FrameStream};
