//! Top-level sequencer: config-gen -> batch(es) -> aggregation -> import.

pub mod orchestrator;

pub use orchestrator::{PipelineOptions, PipelineOrchestrator, PipelineResult};
