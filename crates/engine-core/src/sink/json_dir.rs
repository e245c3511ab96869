use crate::{error::SinkError, sink::BatchSink};
use async_trait::async_trait;
use model::records::batch::Batch;
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};

const PREFIX: &str = "batch_";
const SUFFIX: &str = ".json";

/// Writes each batch to `<dir>/batch_<seq>.json`.
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, seq: u64) -> PathBuf {
        self.dir.join(format!("{PREFIX}{seq:05}{SUFFIX}"))
    }
}

#[async_trait]
impl BatchSink for JsonDirSink {
    async fn write(&self, batch: &Batch) -> Result<(), SinkError> {
        let bytes = serde_json::to_vec_pretty(batch).map_err(|source| SinkError::Encode {
            seq: batch.seq,
            source,
        })?;

        let target = self.path_for(batch.seq);
        let tmp = target.with_extension("json.tmp");

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &target).await?;

        debug!(seq = batch.seq, path = %target.display(), "Wrote batch file");
        Ok(())
    }
}

/// Parses the sequence number out of a `batch_<seq>.json` file name.
fn seq_of(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?.parse().ok()
}

/// Loads every batch in `dir`, ordered by sequence number.
///
/// Leftover temp files are skipped. A batch whose records no longer match
/// its manifest is an error.
pub async fn load_batches(dir: impl AsRef<Path>) -> Result<Vec<Batch>, SinkError> {
    let mut found = Vec::new();
    let mut entries = fs::read_dir(dir.as_ref()).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        match seq_of(&path) {
            Some(seq) => found.push((seq, path)),
            None => {
                if path.extension().is_some_and(|ext| ext == "tmp") {
                    warn!(path = %path.display(), "Skipping unfinished batch file");
                }
            }
        }
    }
    found.sort_by_key(|(seq, _)| *seq);

    let mut batches = Vec::with_capacity(found.len());
    for (_, path) in found {
        let bytes = fs::read(&path).await?;
        let batch: Batch = serde_json::from_slice(&bytes).map_err(|source| SinkError::Decode {
            path: path.display().to_string(),
            source,
        })?;
        if !batch.verify() {
            return Err(SinkError::ChecksumMismatch(batch.seq));
        }
        batches.push(batch);
    }

    Ok(batches)
}
