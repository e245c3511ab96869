use crate::{
    error::StateStoreError,
    state::models::{Checkpoint, WalEntry},
};
use async_trait::async_trait;

pub mod file_store;
pub mod models;
pub mod sled_store;

/// Durable marker of the last fully flushed position, plus the run journal.
///
/// `set` must be atomic: after a crash at any point, `get` returns either the
/// previous checkpoint or the new one, never a torn write. Implementations
/// ignore an update that would move the position backwards.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self) -> Result<Option<Checkpoint>, StateStoreError>;
    async fn set(&self, cp: &Checkpoint) -> Result<(), StateStoreError>;
    async fn append_wal(&self, entry: &WalEntry) -> Result<(), StateStoreError>;
    async fn iter_wal(&self) -> Result<Vec<WalEntry>, StateStoreError>;
}
