use crate::accumulator::FlushedBatch;
use chrono::Utc;
use engine_core::{
    error::StateStoreError,
    state::{
        CheckpointStore,
        models::{Checkpoint, WalEntry},
    },
};
use model::pagination::cursor::Cursor;
use std::sync::Arc;
use tracing::{info, warn};

/// Owns the checkpoint and journal of one run.
///
/// Gaps are journaled as they happen and folded into the checkpoint once
/// the checkpoint moves past them.
pub struct StateManager {
    run: String,
    store: Arc<dyn CheckpointStore>,
    checkpoint: Option<Checkpoint>,
    pending_gaps: Vec<Cursor>,
}

impl StateManager {
    pub fn new(run: impl Into<String>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            run: run.into(),
            store,
            checkpoint: None,
            pending_gaps: Vec::new(),
        }
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    /// Loads the checkpoint and journals the start of this attempt.
    ///
    /// A plan whose fingerprint differs from the previous attempt's is
    /// accepted with a warning: batch boundaries after the checkpoint may
    /// shift, which the dedup merge absorbs.
    pub async fn begin(&mut self, plan_hash: &str) -> Result<Option<Checkpoint>, StateStoreError> {
        let checkpoint = self.store.get().await?;

        let previous_hash = self
            .store
            .iter_wal()
            .await?
            .into_iter()
            .rev()
            .find_map(|entry| match entry {
                WalEntry::RunStart { plan_hash, .. } => Some(plan_hash),
                _ => None,
            });
        if let Some(previous) = previous_hash
            && previous != plan_hash
        {
            warn!(
                run = %self.run,
                previous = %previous,
                current = %plan_hash,
                "Plan changed since the last attempt"
            );
        }

        match &checkpoint {
            Some(cp) => info!(
                run = %self.run,
                position = %cp.position,
                next_batch_seq = cp.next_batch_seq,
                records_flushed = cp.records_flushed,
                "Resuming from checkpoint"
            ),
            None => info!(run = %self.run, "No checkpoint found, starting from the beginning"),
        }

        self.store
            .append_wal(&WalEntry::RunStart {
                run: self.run.clone(),
                plan_hash: plan_hash.to_string(),
                resume_from: checkpoint.as_ref().map(|cp| cp.resume_cursor()),
                at: Utc::now(),
            })
            .await?;

        self.checkpoint = checkpoint.clone();
        Ok(checkpoint)
    }

    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }

    pub fn position(&self) -> Option<Cursor> {
        self.checkpoint.as_ref().map(|cp| cp.position)
    }

    pub fn next_batch_seq(&self) -> u64 {
        self.checkpoint.as_ref().map_or(0, |cp| cp.next_batch_seq)
    }

    /// Confirmed gaps followed by those not yet covered by the checkpoint.
    pub fn gaps(&self) -> Vec<Cursor> {
        let mut gaps: Vec<Cursor> = self
            .checkpoint
            .as_ref()
            .map(|cp| cp.gaps.clone())
            .unwrap_or_default();
        gaps.extend(self.pending_gaps.iter().copied());
        gaps
    }

    pub async fn record_gap(
        &mut self,
        cursor: Cursor,
        attempts: u32,
        error: &str,
    ) -> Result<(), StateStoreError> {
        self.store
            .append_wal(&WalEntry::Gap {
                run: self.run.clone(),
                cursor,
                attempts,
                error: error.to_string(),
            })
            .await?;
        self.pending_gaps.push(cursor);
        Ok(())
    }

    /// Journals a flushed batch, if any, then moves the checkpoint to
    /// `position`. Must only be called once everything up to `position` is
    /// durably flushed. Returns whether the checkpoint moved.
    pub async fn commit(
        &mut self,
        flushed: Option<&FlushedBatch>,
        position: Cursor,
        next_batch_seq: u64,
    ) -> Result<bool, StateStoreError> {
        if let Some(batch) = flushed {
            self.store
                .append_wal(&WalEntry::BatchFlushed {
                    run: self.run.clone(),
                    seq: batch.seq,
                    first_cursor: batch.first_cursor,
                    last_cursor: batch.last_cursor,
                    records: batch.record_count as u64,
                    checksum: batch.checksum.clone(),
                })
                .await?;
        }

        if flushed.is_none() && self.position().is_some_and(|p| p >= position) {
            return Ok(false);
        }

        let mut next = self
            .checkpoint
            .clone()
            .unwrap_or_else(|| Checkpoint::new(self.run.clone(), position, next_batch_seq));
        next.position = next.position.max(position);
        next.next_batch_seq = next.next_batch_seq.max(next_batch_seq);
        next.records_flushed += flushed.map_or(0, |b| b.record_count as u64);
        next.updated_at = Utc::now();

        let (covered, pending): (Vec<Cursor>, Vec<Cursor>) = self
            .pending_gaps
            .iter()
            .partition(|c| **c <= next.position);
        next.gaps.extend(covered);
        next.gaps.sort();
        next.gaps.dedup();

        self.store.set(&next).await?;

        info!(
            run = %self.run,
            position = %next.position,
            next_batch_seq = next.next_batch_seq,
            records_flushed = next.records_flushed,
            "Checkpoint advanced"
        );

        self.pending_gaps = pending;
        self.checkpoint = Some(next);
        Ok(true)
    }

    pub async fn finish(&self, reason: &str) -> Result<(), StateStoreError> {
        self.store
            .append_wal(&WalEntry::RunDone {
                run: self.run.clone(),
                reason: reason.to_string(),
                at: Utc::now(),
            })
            .await
    }

    pub async fn fail(&self, error: &str) -> Result<(), StateStoreError> {
        self.store
            .append_wal(&WalEntry::RunFailed {
                run: self.run.clone(),
                error: error.to_string(),
                at: Utc::now(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::state::file_store::FileCheckpointStore;
    use tempfile::tempdir;

    fn flushed(seq: u64, first: u64, last: u64, records: usize) -> FlushedBatch {
        FlushedBatch {
            seq,
            first_cursor: Cursor::new(first),
            last_cursor: Cursor::new(last),
            record_count: records,
            checksum: "c".into(),
        }
    }

    async fn manager(dir: &std::path::Path) -> StateManager {
        let store = FileCheckpointStore::open(dir, "run").await.unwrap();
        StateManager::new("run", Arc::new(store))
    }

    #[tokio::test]
    async fn commit_folds_covered_gaps_into_checkpoint() {
        let dir = tempdir().unwrap();
        let mut state = manager(dir.path()).await;
        assert!(state.begin("h1").await.unwrap().is_none());

        state.record_gap(Cursor::new(3), 3, "timeout").await.unwrap();
        state.record_gap(Cursor::new(12), 1, "404").await.unwrap();

        assert!(state
            .commit(Some(&flushed(0, 1, 10, 28)), Cursor::new(10), 1)
            .await
            .unwrap());

        let cp = state.checkpoint().unwrap();
        assert_eq!(cp.position, Cursor::new(10));
        assert_eq!(cp.next_batch_seq, 1);
        assert_eq!(cp.records_flushed, 28);
        assert_eq!(cp.gaps, vec![Cursor::new(3)]);
        assert_eq!(state.gaps(), vec![Cursor::new(3), Cursor::new(12)]);
    }

    #[tokio::test]
    async fn resume_sees_previous_checkpoint() {
        let dir = tempdir().unwrap();
        {
            let mut state = manager(dir.path()).await;
            state.begin("h1").await.unwrap();
            state
                .commit(Some(&flushed(0, 1, 10, 140)), Cursor::new(10), 1)
                .await
                .unwrap();
        }

        let mut state = manager(dir.path()).await;
        let cp = state.begin("h2").await.unwrap().unwrap();
        assert_eq!(cp.resume_cursor(), Cursor::new(11));
        assert_eq!(state.next_batch_seq(), 1);

        state
            .commit(Some(&flushed(1, 11, 20, 14)), Cursor::new(20), 2)
            .await
            .unwrap();
        assert_eq!(state.checkpoint().unwrap().records_flushed, 154);
    }

    #[tokio::test]
    async fn commit_without_progress_is_skipped() {
        let dir = tempdir().unwrap();
        let mut state = manager(dir.path()).await;
        state.begin("h").await.unwrap();
        state
            .commit(Some(&flushed(0, 1, 5, 3)), Cursor::new(5), 1)
            .await
            .unwrap();

        assert!(!state.commit(None, Cursor::new(5), 1).await.unwrap());
        assert!(state.commit(None, Cursor::new(8), 1).await.unwrap());
        assert_eq!(state.position(), Some(Cursor::new(8)));
    }
}
