//! sift-pipeline: capture, adaptive batching, publishing
//!
//! The pipeline is three isolated concurrent units wired by message
//! passing:
//! - `EventCapture` runs on the callers' (UI-affine) context: validate,
//!   check the memory gauge, `try_send` into a bounded channel. No waits,
//!   no I/O, sub-millisecond return
//! - `BatchProcessor` owns all batching state on one background task:
//!   bounded buffer, closed-loop batch sizing, pattern detection, memory
//!   permits, privatization, publishing
//! - `GraphSink` is the outbound boundary; the graph indexer behind it is
//!   not this crate's concern
//!
//! No component ever holds a mutable reference into another's state; the
//! channel and the privacy budget are the only contended resources and
//! both are exposed through narrow atomic operations.

mod capture;
mod controller;
mod error;
pub mod metrics;
mod patterns;
mod permits;
mod pipeline;
mod processor;
mod sink;

pub use capture::EventCapture;
pub use controller::AdaptiveController;
pub use error::{CaptureError, PermitError, ProcessError, SinkError};
pub use patterns::{PatternSnapshot, SequencePattern, TemporalPattern};
pub use permits::{MemoryGauge, MemoryPermit, MemoryPool, PERMIT_GRANULARITY};
pub use pipeline::{Pipeline, PipelineError, PipelineHandle};
pub use processor::{BatchProcessor, MetricsSnapshot, ProcessorMetrics};
pub use sink::{GraphSink, MemorySink, NullSink};
