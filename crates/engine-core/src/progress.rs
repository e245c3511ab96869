use crate::{
    error::ProgressError,
    state::{
        CheckpointStore,
        models::{Checkpoint, WalEntry},
    },
};
use chrono::{DateTime, Utc};
use model::pagination::cursor::Cursor;
use serde::Serialize;
use std::{fmt, sync::Arc};

/// Reads the state a harvest left behind, for `status` reporting.
#[derive(Clone)]
pub struct ProgressService {
    pub store: Arc<dyn CheckpointStore>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ProgressStage {
    Idle,
    Running,
    Done,
    Failed,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStage::Idle => "Idle",
            ProgressStage::Running => "Running",
            ProgressStage::Done => "Done",
            ProgressStage::Failed => "Failed",
        }
    }
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressStatus {
    pub stage: ProgressStage,
    pub last_cursor: Option<Cursor>,
    pub records_flushed: u64,
    pub batches: u64,
    /// Confirmed gaps from the checkpoint.
    pub gaps: Vec<Cursor>,
    /// Gaps journaled after the last checkpoint; a resume re-fetches these.
    pub pending_gaps: Vec<Cursor>,
    pub started_at: Option<DateTime<Utc>>,
    pub plan_hash: Option<String>,
    pub outcome: Option<String>,
}

impl ProgressService {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        ProgressService { store }
    }

    pub async fn status(&self) -> Result<ProgressStatus, ProgressError> {
        let wal_entries = self
            .store
            .iter_wal()
            .await
            .map_err(|e| ProgressError::Wal(e.to_string()))?;
        let checkpoint = self
            .store
            .get()
            .await
            .map_err(|e| ProgressError::LoadCheckpoint(e.to_string()))?;

        Ok(derive_status(&wal_entries, checkpoint.as_ref()))
    }
}

/// Only entries after the most recent `RunStart` describe the latest
/// attempt; earlier attempts only matter through the checkpoint.
fn derive_status(entries: &[WalEntry], checkpoint: Option<&Checkpoint>) -> ProgressStatus {
    let latest = entries
        .iter()
        .rposition(|e| matches!(e, WalEntry::RunStart { .. }))
        .map(|idx| &entries[idx..])
        .unwrap_or(entries);

    let mut stage = if entries.is_empty() && checkpoint.is_none() {
        ProgressStage::Idle
    } else {
        ProgressStage::Running
    };
    let mut started_at = None;
    let mut plan_hash = None;
    let mut outcome = None;
    let mut journaled_gaps = Vec::new();

    for entry in latest {
        match entry {
            WalEntry::RunStart { plan_hash: h, at, .. } => {
                started_at = Some(*at);
                plan_hash = Some(h.clone());
            }
            WalEntry::Gap { cursor, .. } => journaled_gaps.push(*cursor),
            WalEntry::RunDone { reason, .. } => {
                stage = ProgressStage::Done;
                outcome = Some(reason.clone());
            }
            WalEntry::RunFailed { error, .. } => {
                stage = ProgressStage::Failed;
                outcome = Some(error.clone());
            }
            WalEntry::BatchFlushed { .. } => {}
        }
    }

    let (last_cursor, records_flushed, batches, gaps) = match checkpoint {
        Some(cp) => (
            Some(cp.position),
            cp.records_flushed,
            cp.next_batch_seq,
            cp.gaps.clone(),
        ),
        None => (None, 0, 0, Vec::new()),
    };

    let pending_gaps = journaled_gaps
        .into_iter()
        .filter(|c| last_cursor.is_none_or(|pos| *c > pos))
        .collect();

    ProgressStatus {
        stage,
        last_cursor,
        records_flushed,
        batches,
        gaps,
        pending_gaps,
        started_at,
        plan_hash,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::file_store::FileCheckpointStore;
    use tempfile::tempdir;

    const RUN: &str = "test-run";

    fn run_start() -> WalEntry {
        WalEntry::RunStart {
            run: RUN.to_string(),
            plan_hash: "abc".into(),
            resume_from: None,
            at: Utc::now(),
        }
    }

    fn gap(cursor: u64) -> WalEntry {
        WalEntry::Gap {
            run: RUN.to_string(),
            cursor: Cursor::new(cursor),
            attempts: 3,
            error: "timeout".into(),
        }
    }

    async fn service() -> (tempfile::TempDir, Arc<dyn CheckpointStore>, ProgressService) {
        let dir = tempdir().unwrap();
        let store: Arc<dyn CheckpointStore> =
            Arc::new(FileCheckpointStore::open(dir.path(), RUN).await.unwrap());
        let service = ProgressService::new(store.clone());
        (dir, store, service)
    }

    #[tokio::test]
    async fn reports_idle_without_state() {
        let (_dir, _store, service) = service().await;
        let status = service.status().await.unwrap();
        assert_eq!(status.stage, ProgressStage::Idle);
        assert_eq!(status.last_cursor, None);
    }

    #[tokio::test]
    async fn reports_running_with_checkpoint_and_pending_gaps() {
        let (_dir, store, service) = service().await;

        store.append_wal(&run_start()).await.unwrap();
        store.append_wal(&gap(4)).await.unwrap();
        store.append_wal(&gap(31)).await.unwrap();

        let mut cp = Checkpoint::new(RUN, Cursor::new(20), 2);
        cp.records_flushed = 280;
        cp.gaps = vec![Cursor::new(4)];
        store.set(&cp).await.unwrap();

        let status = service.status().await.unwrap();
        assert_eq!(status.stage, ProgressStage::Running);
        assert_eq!(status.last_cursor, Some(Cursor::new(20)));
        assert_eq!(status.records_flushed, 280);
        assert_eq!(status.batches, 2);
        assert_eq!(status.gaps, vec![Cursor::new(4)]);
        assert_eq!(status.pending_gaps, vec![Cursor::new(31)]);
        assert_eq!(status.plan_hash.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn latest_attempt_decides_stage() {
        let (_dir, store, service) = service().await;

        store.append_wal(&run_start()).await.unwrap();
        store
            .append_wal(&WalEntry::RunFailed {
                run: RUN.to_string(),
                error: "disk full".into(),
                at: Utc::now(),
            })
            .await
            .unwrap();
        store.append_wal(&run_start()).await.unwrap();
        store
            .append_wal(&WalEntry::RunDone {
                run: RUN.to_string(),
                reason: "end of data".into(),
                at: Utc::now(),
            })
            .await
            .unwrap();

        let status = service.status().await.unwrap();
        assert_eq!(status.stage, ProgressStage::Done);
        assert_eq!(status.outcome.as_deref(), Some("end of data"));
    }
}
