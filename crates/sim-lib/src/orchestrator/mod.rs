//! Simulation orchestration
//!
//! - [`Pipeline`]: synchronous, deterministic processing of one record per tick
//! - [`Orchestrator`]: async runner driving a source and publishing events
//! - sinks consuming the published event stream

mod pipeline;
mod runner;
mod sink;

pub use pipeline::{simulate, Pipeline, PipelineStats, TickEvent};
pub use runner::{Orchestrator, RunSummary, StopReason};
pub use sink::{
    run_sink, DriftPoint, DriftSnapshot, EventSink, HistoryStore, JsonLinesSink, SimulationStatus,
    SinkReport,
};
