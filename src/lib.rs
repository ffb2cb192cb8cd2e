//! sift-analytics: privacy-preserving interaction analytics pipeline
//!
//! Facade crate re-exporting the workspace members:
//! - `sift_core`: event model, configuration, shared error vocabulary
//! - `sift_privacy`: differential privacy, approximate homomorphic
//!   aggregation, k-anonymity
//! - `sift_pipeline`: capture boundary, adaptive batch processor,
//!   publishing boundary

pub use sift_core as core;
pub use sift_pipeline as pipeline;
pub use sift_privacy as privacy;

pub use sift_core::{CaptureResult, Event, PipelineConfig};
pub use sift_pipeline::{EventCapture, GraphSink, Pipeline, PipelineHandle};
pub use sift_privacy::PrivacyEngine;
