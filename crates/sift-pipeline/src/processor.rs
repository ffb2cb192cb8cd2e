//! Batch processor
//!
//! Owns every piece of mutable batching state (buffer, controller,
//! detectors, batch ids) on one background task; other components reach it
//! only through the event channel. The flush path is permit-gated:
//! reserve memory, drain, privatize, publish, release.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use sift_core::{BatchConfig, BatchId, Event, EVENT_FOOTPRINT};
use sift_privacy::{PrivacyEngine, Priority};

use crate::controller::AdaptiveController;
use crate::error::{PermitError, ProcessError};
use crate::metrics;
use crate::patterns::{PatternSnapshot, SequenceDetector, TemporalDetector};
use crate::permits::MemoryPool;
use crate::sink::GraphSink;

/// Fixed per-flush overhead for privatization scratch (ciphertext
/// components, grouping tables) on top of the events themselves.
const SEAL_OVERHEAD_BYTES: usize = 96 * 1024;

/// Counters shared between the processor task and observers. Every error
/// path increments exactly one of these; nothing is swallowed silently.
#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    pub events_buffered: AtomicU64,
    pub buffer_rejects: AtomicU64,
    pub malformed_events: AtomicU64,
    pub batches_sealed: AtomicU64,
    pub events_sealed: AtomicU64,
    pub permit_timeouts: AtomicU64,
    pub budget_denials: AtomicU64,
    pub privacy_failures: AtomicU64,
    pub publish_failures: AtomicU64,
    pub suppressed_records: AtomicU64,
    pub patterns_reported: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_buffered: u64,
    pub buffer_rejects: u64,
    pub malformed_events: u64,
    pub batches_sealed: u64,
    pub events_sealed: u64,
    pub permit_timeouts: u64,
    pub budget_denials: u64,
    pub privacy_failures: u64,
    pub publish_failures: u64,
    pub suppressed_records: u64,
    pub patterns_reported: u64,
}

impl ProcessorMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_buffered: self.events_buffered.load(Ordering::Relaxed),
            buffer_rejects: self.buffer_rejects.load(Ordering::Relaxed),
            malformed_events: self.malformed_events.load(Ordering::Relaxed),
            batches_sealed: self.batches_sealed.load(Ordering::Relaxed),
            events_sealed: self.events_sealed.load(Ordering::Relaxed),
            permit_timeouts: self.permit_timeouts.load(Ordering::Relaxed),
            budget_denials: self.budget_denials.load(Ordering::Relaxed),
            privacy_failures: self.privacy_failures.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            suppressed_records: self.suppressed_records.load(Ordering::Relaxed),
            patterns_reported: self.patterns_reported.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct BatchProcessor {
    config: BatchConfig,
    buffer: VecDeque<Event>,
    controller: AdaptiveController,
    sequences: SequenceDetector,
    temporal: TemporalDetector,
    pool: Arc<MemoryPool>,
    engine: Arc<PrivacyEngine>,
    sink: Arc<dyn GraphSink>,
    patterns: Arc<ArcSwap<PatternSnapshot>>,
    metrics: Arc<ProcessorMetrics>,
    next_batch: u64,
    last_flush: Instant,
    active: bool,
}

impl BatchProcessor {
    pub fn new(
        config: BatchConfig,
        pool: Arc<MemoryPool>,
        engine: Arc<PrivacyEngine>,
        sink: Arc<dyn GraphSink>,
        patterns: Arc<ArcSwap<PatternSnapshot>>,
        metrics: Arc<ProcessorMetrics>,
    ) -> Self {
        let controller = AdaptiveController::new(&config);
        Self {
            buffer: VecDeque::with_capacity(config.buffer_capacity),
            controller,
            sequences: SequenceDetector::default(),
            temporal: TemporalDetector::default(),
            pool,
            engine,
            sink,
            patterns,
            metrics,
            next_batch: 0,
            last_flush: Instant::now(),
            active: true,
            config,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn batch_target(&self) -> usize {
        self.controller.target()
    }

    /// Buffer one event. Rejects (never overwrites) when the bounded
    /// buffer is at capacity; the caller counts the rejection and goes on.
    pub fn process_event(&mut self, event: Event) -> Result<(), ProcessError> {
        if !self.active {
            return Err(ProcessError::Inactive);
        }
        if let Err(e) = event.validate() {
            ProcessorMetrics::bump(&self.metrics.malformed_events);
            return Err(match e {
                sift_core::Error::InvalidEvent(reason) => ProcessError::Malformed(reason),
                _ => ProcessError::Malformed("invalid event"),
            });
        }
        if self.buffer.len() >= self.config.buffer_capacity {
            ProcessorMetrics::bump(&self.metrics.buffer_rejects);
            metrics::record_buffer_reject();
            return Err(ProcessError::BufferFull {
                capacity: self.config.buffer_capacity,
            });
        }

        self.sequences.observe(&event);
        self.temporal.observe(&event);
        self.buffer.push_back(event);
        ProcessorMetrics::bump(&self.metrics.events_buffered);
        metrics::set_buffer_depth(self.buffer.len());
        Ok(())
    }

    /// Seal and publish up to one controller target's worth of buffered
    /// events. Budget denial re-queues the drained events in order; every
    /// other failure consumes them (counted, logged upstream).
    pub async fn flush(&mut self) -> Result<usize, ProcessError> {
        if !self.active {
            return Err(ProcessError::Inactive);
        }
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let take = self.buffer.len().min(self.controller.target());
        let estimated = take * EVENT_FOOTPRINT + SEAL_OVERHEAD_BYTES;
        let batch_id = BatchId(self.next_batch);
        self.next_batch += 1;

        let permit = match self
            .pool
            .acquire(
                estimated,
                batch_id,
                Duration::from_millis(self.config.permit_timeout_ms),
            )
            .await
        {
            Ok(permit) => permit,
            Err(err) => {
                if matches!(err, PermitError::Timeout { .. }) {
                    ProcessorMetrics::bump(&self.metrics.permit_timeouts);
                }
                metrics::record_flush(metrics::FLUSH_PERMIT_TIMEOUT, 0, Duration::ZERO);
                return Err(err.into());
            }
        };

        let inter_flush = self.last_flush.elapsed();
        let start = Instant::now();
        let events: Vec<Event> = self.buffer.drain(..take).collect();
        metrics::set_buffer_depth(self.buffer.len());

        let grant = match self.engine.request_allocation(Priority::High) {
            Ok(grant) => grant,
            Err(err) => {
                // Hold the events until the budget resets; capture-side
                // backpressure is the honest signal here.
                for event in events.into_iter().rev() {
                    self.buffer.push_front(event);
                }
                ProcessorMetrics::bump(&self.metrics.budget_denials);
                metrics::record_flush(metrics::FLUSH_BUDGET_DENIED, 0, start.elapsed());
                return Err(ProcessError::BudgetDenied(err));
            }
        };

        let sealed = match self.engine.privatize_batch(batch_id, &events, grant) {
            Ok(sealed) => sealed,
            Err(err) => {
                ProcessorMetrics::bump(&self.metrics.privacy_failures);
                metrics::record_flush(metrics::FLUSH_PRIVACY_ERROR, take, start.elapsed());
                return Err(err.into());
            }
        };
        self.metrics
            .suppressed_records
            .fetch_add(sealed.suppressed as u64, Ordering::Relaxed);
        metrics::record_suppressed(sealed.suppressed);

        let publish = self.sink.update_graph(sealed).await;

        // Permit covers the whole materialize-privatize-publish span.
        drop(permit);

        let elapsed = start.elapsed();
        self.last_flush = Instant::now();
        self.controller.observe_batch(
            take,
            inter_flush,
            elapsed,
            self.pool.gauge().available_fraction(),
        );
        self.publish_patterns();

        if let Err(err) = publish {
            ProcessorMetrics::bump(&self.metrics.publish_failures);
            metrics::record_flush(metrics::FLUSH_SINK_ERROR, take, elapsed);
            return Err(err.into());
        }

        ProcessorMetrics::bump(&self.metrics.batches_sealed);
        self.metrics
            .events_sealed
            .fetch_add(take as u64, Ordering::Relaxed);
        metrics::record_flush(metrics::FLUSH_OK, take, elapsed);
        Ok(take)
    }

    fn publish_patterns(&self) {
        let previous = self.patterns.load();
        let sequences = self.sequences.scan();
        let temporal = self.temporal.scan();

        let new_sequences = sequences.len().saturating_sub(previous.sequences.len());
        let new_temporal = temporal.len().saturating_sub(previous.temporal.len());
        if new_sequences + new_temporal > 0 {
            self.metrics
                .patterns_reported
                .fetch_add((new_sequences + new_temporal) as u64, Ordering::Relaxed);
            for _ in 0..new_sequences {
                metrics::record_pattern(metrics::PATTERN_SEQUENCE);
            }
            for _ in 0..new_temporal {
                metrics::record_pattern(metrics::PATTERN_TEMPORAL);
            }
        }

        self.patterns.store(Arc::new(PatternSnapshot {
            sequences,
            temporal,
            generation: previous.generation + 1,
        }));
    }

    /// Run loop: drains the channel, flushes on target or interval, and on
    /// shutdown drains and flushes everything remaining before persisting.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Event>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(Duration::from_millis(self.config.flush_interval_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        rx.close();
                        self.drain_and_stop(&mut rx).await;
                        return;
                    }
                }

                maybe = rx.recv() => {
                    match maybe {
                        Some(event) => {
                            if let Err(err) = self.process_event(event) {
                                tracing::debug!(error = %err, "event rejected");
                            }
                            if self.buffer.len() >= self.controller.target() {
                                self.flush_logged().await;
                            }
                        }
                        None => {
                            self.drain_and_stop(&mut rx).await;
                            return;
                        }
                    }
                }

                _ = tick.tick() => {
                    if !self.buffer.is_empty() {
                        self.flush_logged().await;
                    }
                }
            }
        }
    }

    async fn flush_logged(&mut self) {
        if let Err(err) = self.flush().await {
            match err {
                ProcessError::BudgetDenied(_) | ProcessError::Permit(_) => {
                    tracing::warn!(error = %err, "flush deferred");
                }
                other => {
                    tracing::error!(error = %other, "flush failed");
                }
            }
        }
    }

    /// Cooperative shutdown: pull whatever is already in the channel,
    /// flush until the buffer is empty or the budget blocks, persist
    /// engine state, and go inactive.
    async fn drain_and_stop(&mut self, rx: &mut mpsc::Receiver<Event>) {
        while let Ok(event) = rx.try_recv() {
            if self.process_event(event).is_err() {
                break;
            }
        }

        while !self.buffer.is_empty() {
            match self.flush().await {
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        remaining = self.buffer.len(),
                        "final flush stopped early"
                    );
                    break;
                }
            }
        }

        if let Err(err) = self.engine.persist() {
            tracing::error!(error = %err, "failed to persist engine state on shutdown");
        }
        self.active = false;
        tracing::info!(sealed = self.metrics.batches_sealed.load(Ordering::Relaxed), "processor stopped");
    }

    /// Mark inactive without draining (tests of the lifecycle error).
    pub fn deactivate(&mut self) {
        self.active = false;
    }
}
