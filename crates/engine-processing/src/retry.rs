use engine_core::retry::RetryDisposition;
use model::pagination::page::FetchError;

/// Transient failures (timeouts, connection errors, 5xx, 429, bodies that
/// fail to decode) are retried. Other 4xx responses and malformed requests
/// are permanent.
pub fn classify_fetch_error(err: &FetchError) -> RetryDisposition {
    match err {
        FetchError::Timeout(_) => RetryDisposition::Retry,
        FetchError::Connect(_) => RetryDisposition::Retry,
        FetchError::Decode(_) => RetryDisposition::Retry,
        FetchError::Status { status, .. } => classify_status(*status),
        FetchError::Malformed(_) => RetryDisposition::Stop,
        FetchError::Unexpected(_) => RetryDisposition::Stop,
    }
}

pub fn classify_status(status: u16) -> RetryDisposition {
    match status {
        429 => RetryDisposition::Retry,
        500..=599 => RetryDisposition::Retry,
        _ => RetryDisposition::Stop,
    }
}
