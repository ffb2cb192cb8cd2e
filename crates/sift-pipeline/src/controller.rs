//! Closed-loop batch size controller
//!
//! Every `controller_period` flushed batches the target is recomputed from
//! EWMA event rate, EWMA flush latency, and the memory gauge, clamped to
//! [min_batch, max_batch]. Sustained bursts grow the target by 3/2;
//! elevated latency or memory pressure halves it; steady load decays it
//! toward the configured baseline. Pure state machine, no clocks inside:
//! callers feed observations, so tests run without sleeps.

use std::time::Duration;

use sift_core::BatchConfig;

use crate::metrics;

/// Flush latency above this is treated as "elevated"
const HIGH_LATENCY_MS: f64 = 250.0;

/// Memory availability below this forces shrink
const PRESSURE_FLOOR: f64 = 0.25;

/// EWMA smoothing factor
const ALPHA: f64 = 0.3;

#[derive(Debug)]
pub struct AdaptiveController {
    target: usize,
    min: usize,
    max: usize,
    baseline: usize,
    period: u32,
    batches_since: u32,
    rate_ewma: f64,
    latency_ewma_ms: f64,
    flush_interval: Duration,
}

impl AdaptiveController {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            target: config.baseline_batch,
            min: config.min_batch,
            max: config.max_batch,
            baseline: config.baseline_batch,
            period: config.controller_period,
            batches_since: 0,
            rate_ewma: 0.0,
            latency_ewma_ms: 0.0,
            flush_interval: Duration::from_millis(config.flush_interval_ms),
        }
    }

    pub fn target(&self) -> usize {
        self.target
    }

    /// Record one flushed batch. `inter_flush` is the wall time since the
    /// previous flush, `processing` the time the flush itself took, and
    /// `memory_available` the gauge fraction. Returns the new target when
    /// this observation closed a controller period.
    pub fn observe_batch(
        &mut self,
        events: usize,
        inter_flush: Duration,
        processing: Duration,
        memory_available: f64,
    ) -> Option<usize> {
        let secs = inter_flush.as_secs_f64().max(1e-6);
        let rate = events as f64 / secs;
        self.rate_ewma = if self.rate_ewma == 0.0 {
            rate
        } else {
            ALPHA * rate + (1.0 - ALPHA) * self.rate_ewma
        };
        let latency_ms = processing.as_secs_f64() * 1000.0;
        self.latency_ewma_ms = ALPHA * latency_ms + (1.0 - ALPHA) * self.latency_ewma_ms;

        self.batches_since += 1;
        if self.batches_since < self.period {
            return None;
        }
        self.batches_since = 0;

        // Events expected to arrive within one flush interval at the
        // observed rate; the target chases this under healthy conditions.
        let expected_per_interval = self.rate_ewma * self.flush_interval.as_secs_f64();

        let new_target = if memory_available < PRESSURE_FLOOR
            || self.latency_ewma_ms > HIGH_LATENCY_MS
        {
            self.target / 2
        } else if expected_per_interval > self.target as f64 * 1.5 {
            self.target * 3 / 2
        } else {
            // Decay toward the baseline under steady load
            (self.target + self.baseline) / 2
        };

        self.target = new_target.clamp(self.min, self.max);
        metrics::set_batch_target(self.target);
        tracing::debug!(
            target = self.target,
            rate = self.rate_ewma,
            latency_ms = self.latency_ewma_ms,
            memory_available,
            "batch target recomputed"
        );
        Some(self.target)
    }
}
