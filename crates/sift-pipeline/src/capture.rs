//! Event capture boundary
//!
//! `capture` is the only call the host UI makes into the pipeline, and it
//! must return in well under a millisecond regardless of downstream load.
//! It therefore does exactly three cheap things: validate the event, read
//! the memory gauge (one atomic load), and `try_send` on the bounded
//! channel. Anything else is deferred to the processor's task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use sift_core::{CaptureConfig, CaptureResult, DropReason, Event};

use crate::error::CaptureError;
use crate::metrics;
use crate::permits::MemoryGauge;

/// Cloneable producer handle. Many producers may capture concurrently;
/// exactly one consumer (the processor's run loop) drains the channel, so
/// events arrive in capture order per producer.
#[derive(Clone)]
pub struct EventCapture {
    tx: mpsc::Sender<Event>,
    gauge: MemoryGauge,
    shutdown: Arc<AtomicBool>,
    defer_below: f64,
    drop_below: f64,
}

impl EventCapture {
    pub(crate) fn new(
        tx: mpsc::Sender<Event>,
        gauge: MemoryGauge,
        shutdown: Arc<AtomicBool>,
        config: &CaptureConfig,
    ) -> Self {
        Self {
            tx,
            gauge,
            shutdown,
            defer_below: config.defer_below,
            drop_below: config.drop_below,
        }
    }

    /// Non-blocking enqueue. `Accepted` means the event is durably in the
    /// channel; every load-shedding outcome is reported, never silent.
    pub fn capture(&self, event: Event) -> Result<CaptureResult, CaptureError> {
        let start = Instant::now();

        if self.shutdown.load(Ordering::Acquire) {
            metrics::record_capture(metrics::OUTCOME_INACTIVE, start.elapsed());
            return Err(CaptureError::Inactive);
        }

        if event.validate().is_err() {
            metrics::record_capture(metrics::OUTCOME_DROPPED_MALFORMED, start.elapsed());
            return Ok(CaptureResult::Dropped(DropReason::Malformed));
        }

        let available = self.gauge.available_fraction();
        if available < self.drop_below {
            metrics::record_capture(metrics::OUTCOME_DROPPED_PRESSURE, start.elapsed());
            return Ok(CaptureResult::Dropped(DropReason::MemoryPressure));
        }
        if available < self.defer_below {
            metrics::record_capture(metrics::OUTCOME_DEFERRED, start.elapsed());
            return Ok(CaptureResult::Deferred);
        }

        match self.tx.try_send(event) {
            Ok(()) => {
                metrics::record_capture(metrics::OUTCOME_ACCEPTED, start.elapsed());
                Ok(CaptureResult::Accepted)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::record_capture(metrics::OUTCOME_DROPPED_BACKPRESSURE, start.elapsed());
                Ok(CaptureResult::Dropped(DropReason::Backpressure))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                metrics::record_capture(metrics::OUTCOME_INACTIVE, start.elapsed());
                Err(CaptureError::Inactive)
            }
        }
    }
}
