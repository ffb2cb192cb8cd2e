//! sift-core: shared types for the interaction analytics pipeline
//!
//! This crate defines the value types that cross component boundaries:
//! - `Event`: fixed-size interaction record, copied (never shared) across
//!   the capture / batch / privacy stages
//! - `CaptureResult` / `DropReason`: the capture boundary's answer vocabulary
//! - `PipelineConfig`: the full pipeline configuration with validation,
//!   JSON load/save, and a change-detection hash
//!
//! All mutable state lives in the owning components (`sift_pipeline`,
//! `sift_privacy`); nothing in this crate is shared mutably.

mod config;
mod error;
mod event;

pub use config::{
    BatchConfig, CaptureConfig, PipelineConfig, PrivacyConfig, StorageConfig, CONFIG_VERSION,
};
pub use error::Error;
pub use event::{
    action, BatchId, CaptureResult, DropReason, Event, ACTION_CODE_LIMIT, EVENT_FOOTPRINT,
};

pub type Result<T> = std::result::Result<T, Error>;
