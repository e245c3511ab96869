use engine_core::{error::SinkError, sink::BatchSink};
use model::{
    pagination::cursor::Cursor,
    records::{batch::Batch, record::Record},
};
use std::{mem, sync::Arc};
use tracing::info;

/// What a successful flush wrote, for journaling and checkpointing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedBatch {
    pub seq: u64,
    pub first_cursor: Cursor,
    pub last_cursor: Cursor,
    pub record_count: usize,
    pub checksum: String,
}

/// Buffers records and writes them to the sink as numbered batches.
///
/// The buffer is only cleared after the sink confirms the write. A failed
/// flush leaves every record in place and the sequence number unchanged, so
/// a retry writes the same slot.
pub struct BatchAccumulator {
    sink: Arc<dyn BatchSink>,
    threshold: usize,
    buffer: Vec<Record>,
    range: Option<(Cursor, Cursor)>,
    next_seq: u64,
}

impl BatchAccumulator {
    pub fn new(sink: Arc<dyn BatchSink>, threshold: usize, next_seq: u64) -> Self {
        BatchAccumulator {
            sink,
            threshold: threshold.max(1),
            buffer: Vec::new(),
            range: None,
            next_seq,
        }
    }

    /// Appends the records of one page. The cursor widens the range the
    /// pending batch covers even when the page had no records.
    pub fn extend(&mut self, cursor: Cursor, records: impl IntoIterator<Item = Record>) {
        self.buffer.extend(records);
        self.range = Some(match self.range {
            Some((first, last)) => (first.min(cursor), last.max(cursor)),
            None => (cursor, cursor),
        });
    }

    pub fn should_flush(&self) -> bool {
        self.buffer.len() >= self.threshold
    }

    /// Writes the whole buffer as one batch. `Ok(None)` when there was
    /// nothing to write.
    pub async fn flush(&mut self) -> Result<Option<FlushedBatch>, SinkError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let Some((first_cursor, last_cursor)) = self.range else {
            return Ok(None);
        };

        let records = mem::take(&mut self.buffer);
        let batch = Batch::new(self.next_seq, first_cursor, last_cursor, records);

        if let Err(e) = self.sink.write(&batch).await {
            self.buffer = batch.records;
            return Err(e);
        }

        let flushed = FlushedBatch {
            seq: batch.seq,
            first_cursor,
            last_cursor,
            record_count: batch.len(),
            checksum: batch.manifest.checksum,
        };

        info!(
            batch_seq = flushed.seq,
            records = flushed.record_count,
            first_cursor = %first_cursor,
            last_cursor = %last_cursor,
            "Flushed batch"
        );

        self.next_seq += 1;
        self.range = None;
        Ok(Some(flushed))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}
