use crate::pagination::cursor::Cursor;
use std::time::Duration;
use thiserror::Error;

/// Raw body of a fetched page, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// JSON document returned by a catalog API.
    Json(serde_json::Value),
    /// Rendered markup of a UI-paginated listing.
    Markup(String),
}

/// Why a single page fetch attempt failed.
///
/// Whether a failure is retried is decided by the fetch pool's classifier,
/// not by this type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Server responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Response body is not valid JSON: {0}")]
    Decode(String),

    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unexpected(&self) -> bool {
        matches!(self, FetchError::Unexpected(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(Payload),
    Failure(FetchError),
}

/// Terminal result of fetching one cursor, after all retries.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub cursor: Cursor,
    pub outcome: FetchOutcome,
    pub attempts: u32,
}

impl FetchResult {
    pub fn success(cursor: Cursor, payload: Payload, attempts: u32) -> Self {
        FetchResult {
            cursor,
            outcome: FetchOutcome::Success(payload),
            attempts,
        }
    }

    pub fn failure(cursor: Cursor, error: FetchError, attempts: u32) -> Self {
        FetchResult {
            cursor,
            outcome: FetchOutcome::Failure(error),
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Success(_))
    }
}
