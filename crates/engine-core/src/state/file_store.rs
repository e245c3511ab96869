use crate::{
    error::StateStoreError,
    state::{
        CheckpointStore,
        models::{Checkpoint, WalEntry},
    },
};
use async_trait::async_trait;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt};
use tracing::warn;

const CHECKPOINT_FILE: &str = "checkpoint.json";
const JOURNAL_FILE: &str = "journal.jsonl";

/// Checkpoint kept as one JSON file, replaced with write-temp-then-rename.
///
/// Layout under `<root>/<run>/`:
/// - `checkpoint.json` holds the current checkpoint
/// - `journal.jsonl` holds one WAL entry per line
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub async fn open(root: impl AsRef<Path>, run: &str) -> Result<Self, StateStoreError> {
        let dir = root.as_ref().join(run);
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    async fn write_atomic(&self, bytes: &[u8]) -> std::io::Result<()> {
        let target = self.checkpoint_path();
        let tmp = target.with_extension("json.tmp");

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &target).await?;
        sync_dir(&self.dir).await;
        Ok(())
    }
}

/// Persists the rename itself. Not every platform lets a directory be
/// opened for syncing, so failures are ignored.
async fn sync_dir(dir: &Path) {
    if let Ok(handle) = fs::File::open(dir).await {
        let _ = handle.sync_all().await;
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self) -> Result<Option<Checkpoint>, StateStoreError> {
        let bytes = match fs::read(self.checkpoint_path()).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateStoreError::LoadCheckpoint(e.to_string())),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StateStoreError::Corrupt(e.to_string()))
    }

    async fn set(&self, cp: &Checkpoint) -> Result<(), StateStoreError> {
        if let Some(existing) = self.get().await?
            && existing.position > cp.position
        {
            warn!(
                current = %existing.position,
                requested = %cp.position,
                "Refusing to move checkpoint backwards"
            );
            return Ok(());
        }

        let bytes = serde_json::to_vec_pretty(cp)
            .map_err(|e| StateStoreError::SaveCheckpoint(e.to_string()))?;
        self.write_atomic(&bytes)
            .await
            .map_err(|e| StateStoreError::SaveCheckpoint(e.to_string()))
    }

    async fn append_wal(&self, entry: &WalEntry) -> Result<(), StateStoreError> {
        let mut line =
            serde_json::to_vec(entry).map_err(|e| StateStoreError::AppendWal(e.to_string()))?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.journal_path())
            .await
            .map_err(|e| StateStoreError::AppendWal(e.to_string()))?;
        file.write_all(&line)
            .await
            .map_err(|e| StateStoreError::AppendWal(e.to_string()))?;
        file.sync_data()
            .await
            .map_err(|e| StateStoreError::AppendWal(e.to_string()))
    }

    async fn iter_wal(&self) -> Result<Vec<WalEntry>, StateStoreError> {
        let text = match fs::read_to_string(self.journal_path()).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StateStoreError::IterateWal(e.to_string())),
        };

        let total = text.lines().count();
        let mut entries = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                // A crash can leave a torn final line behind.
                Err(e) if idx + 1 == total => {
                    warn!(line = idx + 1, error = %e, "Ignoring torn journal tail");
                }
                Err(e) => return Err(StateStoreError::IterateWal(e.to_string())),
            }
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::pagination::cursor::Cursor;
    use tempfile::tempdir;

    fn cp(position: u64, seq: u64) -> Checkpoint {
        Checkpoint::new("run", Cursor::new(position), seq)
    }

    #[tokio::test]
    async fn missing_checkpoint_is_none() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path(), "run").await.unwrap();
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path(), "run").await.unwrap();

        let mut checkpoint = cp(20, 2);
        checkpoint.gaps.push(Cursor::new(13));
        store.set(&checkpoint).await.unwrap();

        let loaded = store.get().await.unwrap().unwrap();
        assert_eq!(loaded.position, Cursor::new(20));
        assert_eq!(loaded.next_batch_seq, 2);
        assert_eq!(loaded.gaps, vec![Cursor::new(13)]);
        assert_eq!(loaded.resume_cursor(), Cursor::new(21));
        assert!(!store.dir().join("checkpoint.json.tmp").exists());
    }

    #[tokio::test]
    async fn never_moves_backwards() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path(), "run").await.unwrap();

        store.set(&cp(40, 4)).await.unwrap();
        store.set(&cp(10, 1)).await.unwrap();

        assert_eq!(store.get().await.unwrap().unwrap().position, Cursor::new(40));
    }

    #[tokio::test]
    async fn leftover_temp_file_does_not_affect_reads() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path(), "run").await.unwrap();
        store.set(&cp(5, 1)).await.unwrap();

        // Simulates a crash between writing the temp file and the rename.
        std::fs::write(store.dir().join("checkpoint.json.tmp"), b"{\"run\": \"ru").unwrap();

        assert_eq!(store.get().await.unwrap().unwrap().position, Cursor::new(5));
        store.set(&cp(6, 1)).await.unwrap();
        assert_eq!(store.get().await.unwrap().unwrap().position, Cursor::new(6));
    }

    #[tokio::test]
    async fn corrupt_checkpoint_is_reported() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path(), "run").await.unwrap();
        std::fs::write(store.dir().join("checkpoint.json"), b"not json").unwrap();

        assert!(matches!(
            store.get().await,
            Err(StateStoreError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn journal_appends_in_order_and_skips_torn_tail() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path(), "run").await.unwrap();

        for cursor in [3, 9] {
            store
                .append_wal(&WalEntry::Gap {
                    run: "run".into(),
                    cursor: Cursor::new(cursor),
                    attempts: 3,
                    error: "timeout".into(),
                })
                .await
                .unwrap();
        }

        let path = store.dir().join("journal.jsonl");
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str("{\"Gap\":{\"run\"");
        std::fs::write(&path, text).unwrap();

        let entries = store.iter_wal().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(
            &entries[1],
            WalEntry::Gap { cursor, .. } if *cursor == Cursor::new(9)
        ));
    }

    #[tokio::test]
    async fn journal_survives_reopening_the_store() {
        let dir = tempdir().unwrap();
        {
            let store = FileCheckpointStore::open(dir.path(), "run").await.unwrap();
            store
                .append_wal(&WalEntry::Gap {
                    run: "run".into(),
                    cursor: Cursor::new(7),
                    attempts: 1,
                    error: "status 404".into(),
                })
                .await
                .unwrap();
            store.set(&cp(8, 1)).await.unwrap();
        }

        let reopened = FileCheckpointStore::open(dir.path(), "run").await.unwrap();
        let entries = reopened.iter_wal().await.unwrap();
        assert!(matches!(
            entries.as_slice(),
            [WalEntry::Gap { cursor, attempts: 1, .. }] if *cursor == Cursor::new(7)
        ));
        assert_eq!(reopened.get().await.unwrap().unwrap().position, Cursor::new(8));
    }
}
