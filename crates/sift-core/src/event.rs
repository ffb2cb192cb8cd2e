//! Interaction event model
//!
//! Events are fixed-size value types: created once at the capture boundary,
//! consumed by exactly one batch, never persisted. Keeping the shape fixed
//! (no dynamic metadata) makes them cheap to copy across the channel and
//! makes buffer memory accounting exact.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Named action codes. Codes at or above [`ACTION_CODE_LIMIT`] are rejected
/// at the capture boundary.
pub mod action {
    pub const DOCUMENT_SCANNED: u16 = 1;
    pub const DOCUMENT_VIEWED: u16 = 2;
    pub const DOCUMENT_EDITED: u16 = 3;
    pub const DOCUMENT_EXPORTED: u16 = 4;
    pub const DOCUMENT_SHARED: u16 = 5;
    pub const TEMPLATE_APPLIED: u16 = 6;
    pub const SEARCH_PERFORMED: u16 = 7;
    pub const TAG_EDITED: u16 = 8;
}

/// Exclusive upper bound on valid action codes.
pub const ACTION_CODE_LIMIT: u16 = 64;

/// Per-event memory footprint used for buffer accounting (struct size
/// rounded up to alignment).
pub const EVENT_FOOTPRINT: usize = 32;

/// A single user-interaction event.
///
/// Immutable once created; `Copy` so it is handed off by value across the
/// capture channel and batch boundaries with no implicit sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Seconds since epoch (host clock, truncated)
    pub timestamp: u32,
    /// Opaque user identifier
    pub user_id: u64,
    /// Action code (see [`action`])
    pub action: u16,
    /// Opaque document identifier
    pub document_id: u64,
    /// Template in effect, 0 if none
    pub template_id: u32,
    /// Reserved flag bits
    pub flags: u16,
}

impl Event {
    pub fn new(timestamp: u32, user_id: u64, action: u16, document_id: u64) -> Self {
        Self {
            timestamp,
            user_id,
            action,
            document_id,
            template_id: 0,
            flags: 0,
        }
    }

    /// Reject malformed events at the boundary rather than coercing them.
    pub fn validate(&self) -> Result<(), Error> {
        if self.timestamp == 0 {
            return Err(Error::InvalidEvent("zero timestamp"));
        }
        if self.user_id == 0 {
            return Err(Error::InvalidEvent("zero user id"));
        }
        if self.action == 0 || self.action >= ACTION_CODE_LIMIT {
            return Err(Error::InvalidEvent("action code out of range"));
        }
        Ok(())
    }
}

/// Outcome of a `capture` call. `Accepted` means the event is durably in
/// the channel; the other arms are load-shedding outcomes the caller may
/// count, retry, or ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureResult {
    Accepted,
    /// Memory pressure is elevated; the caller may retry shortly.
    Deferred,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MemoryPressure,
    Backpressure,
    Malformed,
}

/// Monotonic batch identifier assigned by the batch processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(pub u64);

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}
