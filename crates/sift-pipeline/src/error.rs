//! Pipeline error types
//!
//! Capacity errors (buffer full, permit timeout) are expected under load:
//! counted, never fatal. Lifecycle errors fail fast and are checkable.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture pipeline is inactive (shut down)")]
    Inactive,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PermitError {
    #[error("memory permit timed out after {waited_ms} ms waiting for {bytes} bytes")]
    Timeout { bytes: usize, waited_ms: u64 },

    #[error("requested {bytes} bytes exceeds pool capacity {capacity}")]
    Exhausted { bytes: usize, capacity: usize },

    #[error("memory pool closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("event buffer full (capacity {capacity})")]
    BufferFull { capacity: usize },

    #[error("malformed event: {0}")]
    Malformed(&'static str),

    #[error("processor is inactive (shut down)")]
    Inactive,

    #[error("privacy budget denied for this batch: {0}")]
    BudgetDenied(sift_privacy::BudgetError),

    #[error(transparent)]
    Permit(#[from] PermitError),

    #[error(transparent)]
    Privacy(#[from] sift_privacy::PrivacyError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("sink rejected batch: {0}")]
    Rejected(String),
}
