//! Outbound boundary: the knowledge-graph updater
//!
//! The pipeline hands sealed batches to a `GraphSink` and nothing else;
//! whatever graph or index lives behind it is out of scope. Publish
//! failures are counted and logged by the processor, never fatal.

use async_trait::async_trait;
use tokio::sync::Mutex;

use sift_privacy::SealedBatch;

use crate::error::SinkError;

#[async_trait]
pub trait GraphSink: Send + Sync {
    async fn update_graph(&self, batch: SealedBatch) -> Result<(), SinkError>;
}

/// Discards every batch. Default sink for load generation and benchmarks.
pub struct NullSink;

#[async_trait]
impl GraphSink for NullSink {
    async fn update_graph(&self, _batch: SealedBatch) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Captures batches in memory for tests.
#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<SealedBatch>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn received(&self) -> Vec<SealedBatch> {
        self.batches.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.batches.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.batches.lock().await.is_empty()
    }
}

#[async_trait]
impl GraphSink for MemorySink {
    async fn update_graph(&self, batch: SealedBatch) -> Result<(), SinkError> {
        self.batches.lock().await.push(batch);
        Ok(())
    }
}
