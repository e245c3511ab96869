use serde::Serialize;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    pages_fetched: AtomicU64,
    pages_failed: AtomicU64,
    gaps: AtomicU64,
    records_normalized: AtomicU64,
    mapping_errors: AtomicU64,
    records_flushed: AtomicU64,
    batches_flushed: AtomicU64,
    retry_count: AtomicU64,
    unexpected_errors: AtomicU64,
}

/// Run counters.
///
/// Only the coordinator's result-processing step writes these; the atomics
/// let a status reader take a snapshot while the run is in progress.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
    started: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub pages_fetched: u64,
    pub pages_failed: u64,
    pub gaps: u64,
    pub records_normalized: u64,
    pub mapping_errors: u64,
    pub records_flushed: u64,
    pub batches_flushed: u64,
    pub retry_count: u64,
    pub unexpected_errors: u64,
}

/// Counters plus elapsed wall time at the moment of the snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RunState {
    #[serde(flatten)]
    pub counters: MetricsSnapshot,
    pub elapsed: Duration,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
            started: Instant::now(),
        }
    }

    pub fn increment_fetched(&self, count: u64) {
        self.inner.pages_fetched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_failed(&self, count: u64) {
        self.inner.pages_failed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_gaps(&self, count: u64) {
        self.inner.gaps.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_records(&self, count: u64) {
        self.inner
            .records_normalized
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_mapping_errors(&self, count: u64) {
        self.inner.mapping_errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_flushed(&self, records: u64) {
        self.inner
            .records_flushed
            .fetch_add(records, Ordering::Relaxed);
        self.inner.batches_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retries(&self, count: u64) {
        self.inner.retry_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_unexpected(&self, count: u64) {
        self.inner
            .unexpected_errors
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pages_fetched: self.inner.pages_fetched.load(Ordering::Relaxed),
            pages_failed: self.inner.pages_failed.load(Ordering::Relaxed),
            gaps: self.inner.gaps.load(Ordering::Relaxed),
            records_normalized: self.inner.records_normalized.load(Ordering::Relaxed),
            mapping_errors: self.inner.mapping_errors.load(Ordering::Relaxed),
            records_flushed: self.inner.records_flushed.load(Ordering::Relaxed),
            batches_flushed: self.inner.batches_flushed.load(Ordering::Relaxed),
            retry_count: self.inner.retry_count.load(Ordering::Relaxed),
            unexpected_errors: self.inner.unexpected_errors.load(Ordering::Relaxed),
        }
    }

    pub fn run_state(&self) -> RunState {
        RunState {
            counters: self.snapshot(),
            elapsed: self.elapsed(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats a duration the way progress lines print it: `07m 05s`, or
/// `1h 07m 05s` past the hour.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else {
        format!("{minutes:02}m {seconds:02}s")
    }
}
