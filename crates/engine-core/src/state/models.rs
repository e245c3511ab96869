use chrono::{DateTime, Utc};
use model::pagination::cursor::Cursor;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Checkpoint {
    pub run: String,
    /// Last cursor whose records are durably flushed.
    pub position: Cursor,
    /// Slot the next flushed batch will occupy.
    pub next_batch_seq: u64,
    pub records_flushed: u64,
    /// Cursors at or before `position` that were given up on.
    pub gaps: Vec<Cursor>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(run: impl Into<String>, position: Cursor, next_batch_seq: u64) -> Self {
        Checkpoint {
            run: run.into(),
            position,
            next_batch_seq,
            records_flushed: 0,
            gaps: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// First cursor a resumed run has to fetch.
    pub fn resume_cursor(&self) -> Cursor {
        self.position.next()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum WalEntry {
    RunStart {
        run: String,
        plan_hash: String,
        resume_from: Option<Cursor>,
        at: DateTime<Utc>,
    },
    BatchFlushed {
        run: String,
        seq: u64,
        first_cursor: Cursor,
        last_cursor: Cursor,
        records: u64,
        checksum: String,
    },
    Gap {
        run: String,
        cursor: Cursor,
        attempts: u32,
        error: String,
    },
    RunDone {
        run: String,
        reason: String,
        at: DateTime<Utc>,
    },
    RunFailed {
        run: String,
        error: String,
        at: DateTime<Utc>,
    },
}

impl WalEntry {
    pub fn run(&self) -> &str {
        match self {
            WalEntry::RunStart { run, .. } => run,
            WalEntry::BatchFlushed { run, .. } => run,
            WalEntry::Gap { run, .. } => run,
            WalEntry::RunDone { run, .. } => run,
            WalEntry::RunFailed { run, .. } => run,
        }
    }
}
