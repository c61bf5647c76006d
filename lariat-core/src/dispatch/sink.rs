//! Batch sinks

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::trace::TraceBatch;

/// Destination for finalized trace batches
#[async_trait]
pub trait TraceSink: Send + Sync {
    /// Deliver one batch
    async fn send_batch(&self, batch: &TraceBatch) -> Result<()>;

    /// Release transport resources; called once, after the final drain
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Keeps every batch in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<TraceBatch>>,
    closed: std::sync::atomic::AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All batches received so far
    pub async fn batches(&self) -> Vec<TraceBatch> {
        self.batches.lock().await.clone()
    }

    pub async fn batch_count(&self) -> usize {
        self.batches.lock().await.len()
    }

    /// Remove and return the received batches
    pub async fn take(&self) -> Vec<TraceBatch> {
        std::mem::take(&mut *self.batches.lock().await)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl TraceSink for MemorySink {
    async fn send_batch(&self, batch: &TraceBatch) -> Result<()> {
        self.batches.lock().await.push(batch.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
