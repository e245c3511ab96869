
use async_trait::async_trait;
use engine_config::{
    plan::{JsonFieldSpec, JsonNormalizeSpec},
    settings::EngineSettings,
};
use engine_core::{error::SinkError, sink::BatchSink};
use engine_processing::{fetch::PageSource, normalize::Normalizer};
use model::{
    pagination::{
        cursor::Cursor,
        page::{FetchError, Payload},
    },
    records::batch::Batch,
};
use serde_json::json;
use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Serves `items` products per page; pages listed in `failures` fail.
#[derive(Default)]
pub(crate) struct FakeCatalog {
    pub items: HashMap<u64, usize>,
    pub default_items: usize,
    pub failures: HashMap<u64, FetchError>,
    pub calls: AtomicUsize,
}

impl FakeCatalog {
    pub fn uniform(per_page: usize) -> Self {
        FakeCatalog {
            default_items: per_page,
            ..Default::default()
        }
    }

    pub fn page(mut self, cursor: u64, items: usize) -> Self {
        self.items.insert(cursor, items);
        self
    }

    pub fn failing(mut self, cursor: u64, error: FetchError) -> Self {
        self.failures.insert(cursor, error);
        self
    }
}

#[async_trait]
impl PageSource for FakeCatalog {
    async fn fetch_page(&self, cursor: Cursor) -> Result<Payload, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.get(&cursor.value()) {
            return Err(err.clone());
        }

        let n = self
            .items
            .get(&cursor.value())
            .copied()
            .unwrap_or(self.default_items);
        let products: Vec<_> = (0..n)
            .map(|i| json!({"handle": format!("p{}-{i}", cursor.value()), "title": "Ring"}))
            .collect();
        Ok(Payload::Json(json!({"products": products})))
    }
}

#[derive(Default)]
pub(crate) struct MemorySink {
    pub batches: Mutex<Vec<Batch>>,
    pub fail: AtomicBool,
}

impl MemorySink {
    pub fn record_count(&self) -> usize {
        self.batches.lock().unwrap().iter().map(Batch::len).sum()
    }
}

#[async_trait]
impl BatchSink for MemorySink {
    async fn write(&self, batch: &Batch) -> Result<(), SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::Io(std::io::Error::other("disk full")));
        }
        let mut batches = self.batches.lock().unwrap();
        batches.retain(|b| b.seq != batch.seq);
        batches.push(batch.clone());
        Ok(())
    }
}

pub(crate) fn product_normalizer() -> Normalizer {
    Normalizer::from_spec(&engine_config::plan::NormalizeSpec::Json(JsonNormalizeSpec {
        items_path: "products".into(),
        id_field: "handle".into(),
        fields: vec![
            JsonFieldSpec {
                name: "handle".into(),
                path: "handle".into(),
                required: true,
            },
            JsonFieldSpec {
                name: "title".into(),
                path: "title".into(),
                required: false,
            },
        ],
        metafields: None,
    }))
    .unwrap()
}

pub(crate) fn fast_settings() -> EngineSettings {
    EngineSettings::default()
        .with_retry_delay(Duration::ZERO)
        .with_inter_chunk_delay(Duration::ZERO)
        .with_request_timeout(Duration::from_secs(5))
}
