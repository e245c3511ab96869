use crate::{
    error::StateStoreError,
    state::{
        CheckpointStore,
        models::{Checkpoint, WalEntry},
    },
};
use async_trait::async_trait;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;
use tracing::warn;

/// Checkpoint and journal kept in a sled tree. Several runs may share one
/// database; keys are namespaced by run name.
pub struct SledCheckpointStore {
    db: sled::Db,
    run: String,
}

impl SledCheckpointStore {
    pub fn open(path: impl AsRef<Path>, run: &str) -> Result<Self, StateStoreError> {
        let db = sled::open(path)?;
        Ok(Self::with_db(db, run))
    }

    /// Shares an already open database between runs.
    pub fn with_db(db: sled::Db, run: &str) -> Self {
        Self {
            db,
            run: run.to_string(),
        }
    }

    #[inline]
    fn chk_key(&self) -> String {
        format!("chk:{}", self.run)
    }

    #[inline]
    fn wal_prefix(&self) -> String {
        format!("wal:{}:", self.run)
    }
}

#[async_trait]
impl CheckpointStore for SledCheckpointStore {
    async fn get(&self) -> Result<Option<Checkpoint>, StateStoreError> {
        match self.db.get(self.chk_key())? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| StateStoreError::Corrupt(e.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, cp: &Checkpoint) -> Result<(), StateStoreError> {
        let key = self.chk_key();
        let new_bytes =
            bincode::serialize(cp).map_err(|e| StateStoreError::SaveCheckpoint(e.to_string()))?;

        // Check-then-set inside one transaction so a stale writer cannot
        // slip a lower position in between.
        let result = self.db.transaction::<_, bool, String>(|tx_db| {
            if let Some(existing_bytes) = tx_db.get(&key)? {
                let existing: Checkpoint = bincode::deserialize(&existing_bytes)
                    .map_err(|e| ConflictableTransactionError::Abort(e.to_string()))?;

                if existing.position > cp.position {
                    return Ok(false);
                }
            }

            tx_db.insert(key.as_bytes(), new_bytes.as_slice())?;
            Ok(true)
        });

        let applied = match result {
            Ok(applied) => applied,
            Err(TransactionError::Abort(e)) => return Err(StateStoreError::Corrupt(e)),
            Err(TransactionError::Storage(e)) => return Err(StateStoreError::Sled(e)),
        };

        if !applied {
            warn!(requested = %cp.position, "Refusing to move checkpoint backwards");
            return Ok(());
        }

        self.db.flush_async().await?;
        Ok(())
    }

    async fn append_wal(&self, entry: &WalEntry) -> Result<(), StateStoreError> {
        // Big-endian ids keep the scan in insertion order.
        let id = self.db.generate_id()?;
        let mut key = self.wal_prefix().into_bytes();
        key.extend_from_slice(&id.to_be_bytes());
        let value =
            bincode::serialize(entry).map_err(|e| StateStoreError::AppendWal(e.to_string()))?;

        self.db.insert(key, value)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn iter_wal(&self) -> Result<Vec<WalEntry>, StateStoreError> {
        let mut entries = Vec::new();

        for item in self.db.scan_prefix(self.wal_prefix()) {
            let (_key, value) = item?;
            let entry: WalEntry = bincode::deserialize(&value)
                .map_err(|e| StateStoreError::IterateWal(e.to_string()))?;
            entries.push(entry);
        }

        Ok(entries)
    }
}
