//! Pipeline assembly and lifecycle
//!
//! `Pipeline::open` validates the config, opens the privacy engine against
//! its persisted state, and spawns the processor task. The returned handle
//! is the only way in (capture) and the only way out (patterns, metrics,
//! shutdown).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use sift_core::PipelineConfig;
use sift_privacy::PrivacyEngine;

use crate::capture::EventCapture;
use crate::patterns::PatternSnapshot;
use crate::permits::MemoryPool;
use crate::processor::{BatchProcessor, MetricsSnapshot, ProcessorMetrics};
use crate::sink::GraphSink;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] sift_core::Error),

    #[error(transparent)]
    Privacy(#[from] sift_privacy::PrivacyError),
}

pub struct Pipeline;

impl Pipeline {
    /// Validate the config, open the engine from its storage paths, and
    /// start the processor.
    pub fn open(
        config: PipelineConfig,
        sink: Arc<dyn GraphSink>,
    ) -> Result<PipelineHandle, PipelineError> {
        config.validate()?;
        let engine = Arc::new(PrivacyEngine::open(
            config.privacy.clone(),
            config.storage.clone(),
        )?);
        Ok(Self::spawn(config, engine, sink))
    }

    /// Start the processor against an already-open engine. The config is
    /// assumed validated.
    pub fn spawn(
        config: PipelineConfig,
        engine: Arc<PrivacyEngine>,
        sink: Arc<dyn GraphSink>,
    ) -> PipelineHandle {
        let (tx, rx) = mpsc::channel(config.capture.channel_capacity);
        let pool = Arc::new(MemoryPool::new(config.batch.pool_kib * 1024));
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let capture = EventCapture::new(tx, pool.gauge(), shutdown_flag.clone(), &config.capture);

        let patterns = Arc::new(ArcSwap::from_pointee(PatternSnapshot::default()));
        let metrics = Arc::new(ProcessorMetrics::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let processor = BatchProcessor::new(
            config.batch,
            pool,
            engine.clone(),
            sink,
            patterns.clone(),
            metrics.clone(),
        );
        let task = tokio::spawn(processor.run(rx, shutdown_rx));
        tracing::info!("pipeline started");

        PipelineHandle {
            capture,
            engine,
            patterns,
            metrics,
            shutdown_flag,
            shutdown_tx,
            task,
        }
    }
}

/// Owner's view of a running pipeline.
pub struct PipelineHandle {
    capture: EventCapture,
    engine: Arc<PrivacyEngine>,
    patterns: Arc<ArcSwap<PatternSnapshot>>,
    metrics: Arc<ProcessorMetrics>,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PipelineHandle {
    /// Cloneable producer handle; hand one to each event source.
    pub fn capture(&self) -> EventCapture {
        self.capture.clone()
    }

    pub fn engine(&self) -> &Arc<PrivacyEngine> {
        &self.engine
    }

    /// The most recently published pattern snapshot. Lock-free; safe to
    /// call at any rate from any task.
    pub fn patterns(&self) -> Arc<PatternSnapshot> {
        self.patterns.load_full()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Graceful shutdown: stop intake, drain and flush what is buffered,
    /// persist engine state, then join the processor task.
    pub async fn shutdown(self) -> MetricsSnapshot {
        self.shutdown_flag.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "processor task failed during shutdown");
        }
        self.metrics.snapshot()
    }
}
