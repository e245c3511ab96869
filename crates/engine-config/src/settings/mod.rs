use crate::settings::error::SettingsError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod error;
mod millis;

/// How the delay between fetch attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Every retry waits `retry_delay`.
    #[default]
    Fixed,
    /// The n-th retry waits `retry_delay * 2^(n-1)`, capped at `max_retry_delay`.
    Exponential,
}

/// Tunables for one harvest run.
///
/// Passed explicitly to the coordinator at construction; nothing in the
/// engine reads configuration from globals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Maximum number of requests in flight (K).
    pub concurrency: usize,

    /// Total attempts per cursor, the first one included (R).
    pub max_attempts: u32,

    /// Delay before a retry (D).
    #[serde(rename = "retry_delay_ms", with = "millis")]
    pub retry_delay: Duration,

    pub backoff: Backoff,

    /// Upper bound on exponential backoff.
    #[serde(rename = "max_retry_delay_ms", with = "millis")]
    pub max_retry_delay: Duration,

    /// Hard timeout on every attempt (T).
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,

    /// Buffered record count that triggers a flush.
    pub flush_threshold: usize,

    /// Cursors dispatched per chunk. Zero means "same as concurrency".
    pub chunk_size: usize,

    /// Politeness pause between chunks.
    #[serde(rename = "inter_chunk_delay_ms", with = "millis")]
    pub inter_chunk_delay: Duration,

    /// First cursor of a fresh run.
    pub start: u64,

    /// Last cursor to fetch, inclusive. `None` runs until the data ends.
    pub end: Option<u64>,

    /// Treat a page with zero items (outside the first chunk) as end of data.
    pub stop_on_empty_page: bool,

    /// Consecutive unexpected failures after which dispatch stops.
    pub unexpected_error_threshold: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            concurrency: 10,
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            backoff: Backoff::Fixed,
            max_retry_delay: Duration::from_secs(60),
            request_timeout: Duration::from_secs(20),
            flush_threshold: 140,
            chunk_size: 0,
            inter_chunk_delay: Duration::from_millis(1100),
            start: 1,
            end: None,
            stop_on_empty_page: true,
            unexpected_error_threshold: 5,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.concurrency == 0 {
            return Err(SettingsError::MustBePositive("concurrency"));
        }
        if self.max_attempts == 0 {
            return Err(SettingsError::MustBePositive("max_attempts"));
        }
        if self.flush_threshold == 0 {
            return Err(SettingsError::MustBePositive("flush_threshold"));
        }
        if self.request_timeout.is_zero() {
            return Err(SettingsError::MustBePositive("request_timeout_ms"));
        }
        if self.unexpected_error_threshold == 0 {
            return Err(SettingsError::MustBePositive("unexpected_error_threshold"));
        }
        if self.backoff == Backoff::Exponential && self.max_retry_delay < self.retry_delay {
            return Err(SettingsError::RetryCapBelowDelay {
                delay_ms: self.retry_delay.as_millis() as u64,
                cap_ms: self.max_retry_delay.as_millis() as u64,
            });
        }
        if let Some(end) = self.end
            && end < self.start
        {
            return Err(SettingsError::EmptyRange {
                start: self.start,
                end,
            });
        }
        Ok(())
    }

    /// Effective number of cursors per chunk.
    pub fn chunk_len(&self) -> usize {
        if self.chunk_size == 0 {
            self.concurrency.max(1)
        } else {
            self.chunk_size
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff, max_delay: Duration) -> Self {
        self.backoff = backoff;
        self.max_retry_delay = max_delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_inter_chunk_delay(mut self, delay: Duration) -> Self {
        self.inter_chunk_delay = delay;
        self
    }

    pub fn with_bounds(mut self, start: u64, end: Option<u64>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_stop_on_empty_page(mut self, stop: bool) -> Self {
        self.stop_on_empty_page = stop;
        self
    }

    pub fn with_unexpected_error_threshold(mut self, threshold: u32) -> Self {
        self.unexpected_error_threshold = threshold;
        self
    }
}
