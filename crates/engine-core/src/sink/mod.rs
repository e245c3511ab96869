use crate::error::SinkError;
use async_trait::async_trait;
use model::records::batch::Batch;

pub mod json_dir;

/// Durable destination for flushed batches.
///
/// `write` is create-or-replace keyed by `batch.seq`: writing the same slot
/// twice leaves exactly the second batch behind, and a crash mid-write
/// leaves either the old contents or nothing, never a partial batch.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn write(&self, batch: &Batch) -> Result<(), SinkError>;
}
