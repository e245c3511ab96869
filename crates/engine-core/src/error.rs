use thiserror::Error;

/// Failures of the checkpoint store. Any of these makes resume integrity
/// unverifiable, so callers treat them as run-fatal.
#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("Failed to save checkpoint: {0}")]
    SaveCheckpoint(String),

    #[error("Failed to load checkpoint: {0}")]
    LoadCheckpoint(String),

    #[error("Checkpoint file is corrupt: {0}")]
    Corrupt(String),

    #[error("Failed to append WAL entry: {0}")]
    AppendWal(String),

    #[error("Failed to iterate WAL entries: {0}")]
    IterateWal(String),

    #[error("State store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),
}

/// Failures while persisting or reading back flushed batches.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Batch I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode batch {seq}: {source}")]
    Encode {
        seq: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode batch file '{path}': {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Batch {0} does not match its manifest")]
    ChecksumMismatch(u64),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Sink rejected batch {seq}: {reason}")]
    Rejected { seq: u64, reason: String },
}

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Failed to load checkpoint: {0}")]
    LoadCheckpoint(String),

    #[error("Failed to read WAL: {0}")]
    Wal(String),
}
