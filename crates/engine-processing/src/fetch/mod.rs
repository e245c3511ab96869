use async_trait::async_trait;
use model::pagination::{
    cursor::Cursor,
    page::{FetchError, Payload},
};
use std::sync::Arc;

pub mod http;
pub mod pool;

/// Fetches one page by cursor. A single attempt: retries, timeouts and
/// concurrency limits belong to [`pool::FetchPool`].
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, cursor: Cursor) -> Result<Payload, FetchError>;
}

#[async_trait]
impl<T: PageSource + ?Sized> PageSource for Arc<T> {
    async fn fetch_page(&self, cursor: Cursor) -> Result<Payload, FetchError> {
        (**self).fetch_page(cursor).await
    }
}
