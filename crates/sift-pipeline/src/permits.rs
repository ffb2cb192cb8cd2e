//! Memory permits: backpressure for batch materialization
//!
//! A permit reserves pool bytes before a batch is built and releases them
//! on drop, so every exit path (success, error, cancellation) returns the
//! reservation. The pool publishes an availability gauge that the capture
//! boundary reads with one atomic load.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use sift_core::BatchId;

use crate::error::PermitError;
use crate::metrics;

/// Bytes per semaphore permit
pub const PERMIT_GRANULARITY: usize = 1024;

/// Read-only view of pool availability, safe to poll from any context.
#[derive(Debug, Clone)]
pub struct MemoryGauge {
    available: Arc<AtomicUsize>,
    capacity_permits: usize,
}

impl MemoryGauge {
    /// Fraction of the pool currently unreserved, in [0, 1].
    pub fn available_fraction(&self) -> f64 {
        if self.capacity_permits == 0 {
            return 0.0;
        }
        self.available.load(Ordering::Relaxed) as f64 / self.capacity_permits as f64
    }

    /// Gauge that always reads fully available (tests, loadgen).
    pub fn unlimited() -> Self {
        Self {
            available: Arc::new(AtomicUsize::new(1)),
            capacity_permits: 1,
        }
    }
}

#[derive(Debug)]
pub struct MemoryPool {
    sem: Arc<Semaphore>,
    available: Arc<AtomicUsize>,
    capacity_permits: usize,
}

impl MemoryPool {
    pub fn new(capacity_bytes: usize) -> Self {
        let capacity_permits = capacity_bytes.div_ceil(PERMIT_GRANULARITY).max(1);
        Self {
            sem: Arc::new(Semaphore::new(capacity_permits)),
            available: Arc::new(AtomicUsize::new(capacity_permits)),
            capacity_permits,
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_permits * PERMIT_GRANULARITY
    }

    pub fn gauge(&self) -> MemoryGauge {
        MemoryGauge {
            available: self.available.clone(),
            capacity_permits: self.capacity_permits,
        }
    }

    /// Reserve `bytes` from the pool, waiting at most `timeout`.
    ///
    /// An oversized request fails immediately with `Exhausted` (it could
    /// never succeed); a request that cannot be served in time fails with
    /// `Timeout`, distinguishable from the processor's buffer-full error.
    pub async fn acquire(
        &self,
        bytes: usize,
        owner: BatchId,
        timeout: Duration,
    ) -> Result<MemoryPermit, PermitError> {
        let permits = bytes.div_ceil(PERMIT_GRANULARITY).max(1);
        if permits > self.capacity_permits {
            return Err(PermitError::Exhausted {
                bytes,
                capacity: self.capacity_bytes(),
            });
        }

        let start = Instant::now();
        let acquired = tokio::time::timeout(
            timeout,
            self.sem.clone().acquire_many_owned(permits as u32),
        )
        .await;
        metrics::record_permit_wait(start.elapsed());

        match acquired {
            Ok(Ok(permit)) => {
                self.available.fetch_sub(permits, Ordering::Relaxed);
                metrics::set_memory_available(self.gauge().available_fraction());
                Ok(MemoryPermit {
                    _permit: permit,
                    bytes,
                    permits,
                    owner,
                    available: self.available.clone(),
                })
            }
            Ok(Err(_)) => Err(PermitError::Closed),
            Err(_) => Err(PermitError::Timeout {
                bytes,
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

/// A held reservation. Dropping it releases the bytes unconditionally.
#[derive(Debug)]
pub struct MemoryPermit {
    _permit: OwnedSemaphorePermit,
    bytes: usize,
    permits: usize,
    owner: BatchId,
    available: Arc<AtomicUsize>,
}

impl MemoryPermit {
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn owner(&self) -> BatchId {
        self.owner
    }
}

impl Drop for MemoryPermit {
    fn drop(&mut self) {
        self.available.fetch_add(self.permits, Ordering::Relaxed);
    }
}
