use model::pagination::cursor::Cursor;
use thiserror::Error;

/// A single raw item could not be turned into a record. Scoped to that one
/// item: the rest of the page and batch carry on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("Item {index} at cursor {cursor} is missing required field '{field}'")]
    MissingField {
        cursor: Cursor,
        index: usize,
        field: String,
    },

    #[error("Payload at cursor {cursor} has the wrong shape: {reason}")]
    UnexpectedPayload { cursor: Cursor, reason: String },
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Fetch queue is closed")]
    QueueClosed,

    #[error("Result channel closed before cursor {0} reported")]
    ResultsClosed(Cursor),
}

#[derive(Error, Debug)]
pub enum SourceBuildError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid header '{name}': {reason}")]
    Header { name: String, reason: String },
}
