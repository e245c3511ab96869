use async_trait::async_trait;
use engine_config::{
    plan::{JsonFieldSpec, JsonNormalizeSpec, NormalizeSpec},
    settings::EngineSettings,
};
use engine_core::{
    error::SinkError,
    sink::{BatchSink, json_dir::JsonDirSink, json_dir::load_batches},
    state::{CheckpointStore, file_store::FileCheckpointStore},
};
use engine_processing::{fetch::PageSource, normalize::Normalizer};
use engine_runtime::{
    coordinator::{CoordinatorParams, RunCoordinator},
    summary::RunSummary,
};
use model::{
    pagination::{
        cursor::Cursor,
        page::{FetchError, Payload},
    },
    records::batch::Batch,
};
use serde_json::json;
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub const RUN: &str = "center-stones";

/// In-process catalog: `per_page` products per cursor, with optional
/// per-cursor overrides, failures and latencies.
#[derive(Default)]
pub struct Catalog {
    pub per_page: usize,
    pub sizes: HashMap<u64, usize>,
    pub failures: HashMap<u64, FetchError>,
    pub delays: HashMap<u64, Duration>,
    /// Cancelled once this cursor has been served.
    pub cancel_after: Option<(u64, CancellationToken)>,
    pub calls: AtomicUsize,
}

impl Catalog {
    pub fn uniform(per_page: usize) -> Self {
        Catalog {
            per_page,
            ..Default::default()
        }
    }

    /// Pages after `last` come back empty.
    pub fn ending_at(mut self, last: u64, beyond: u64) -> Self {
        for cursor in last + 1..=beyond {
            self.sizes.insert(cursor, 0);
        }
        self
    }

    pub fn sized(mut self, cursor: u64, items: usize) -> Self {
        self.sizes.insert(cursor, items);
        self
    }

    pub fn failing(mut self, cursor: u64, error: FetchError) -> Self {
        self.failures.insert(cursor, error);
        self
    }

    pub fn delayed(mut self, cursor: u64, delay: Duration) -> Self {
        self.delays.insert(cursor, delay);
        self
    }

    pub fn cancelling_after(mut self, cursor: u64, token: CancellationToken) -> Self {
        self.cancel_after = Some((cursor, token));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Product handle for item `index` on page `cursor`.
pub fn handle(cursor: u64, index: usize) -> String {
    format!("ring-{cursor}-{index}")
}

#[async_trait]
impl PageSource for Catalog {
    async fn fetch_page(&self, cursor: Cursor) -> Result<Payload, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let page = cursor.value();

        if let Some(delay) = self.delays.get(&page) {
            sleep(*delay).await;
        }
        if let Some(err) = self.failures.get(&page) {
            return Err(err.clone());
        }

        let n = self.sizes.get(&page).copied().unwrap_or(self.per_page);
        let products: Vec<_> = (0..n)
            .map(|i| {
                json!({
                    "handle": handle(page, i),
                    "title": format!("Oval {i}"),
                    "variants": [{"price": "1450.00"}],
                })
            })
            .collect();

        if let Some((at, token)) = &self.cancel_after
            && *at == page
        {
            token.cancel();
        }
        Ok(Payload::Json(json!({ "products": products })))
    }
}

/// Batch files on disk, with an optional simulated crash: the batch with
/// sequence `crash_on` is written, then the write reports failure, as if
/// the process died before the checkpoint could move.
pub struct CrashingSink {
    inner: JsonDirSink,
    crash_on: Option<u64>,
}

impl CrashingSink {
    pub async fn open(dir: &Path, crash_on: Option<u64>) -> Self {
        CrashingSink {
            inner: JsonDirSink::open(dir).await.unwrap(),
            crash_on,
        }
    }
}

#[async_trait]
impl BatchSink for CrashingSink {
    async fn write(&self, batch: &Batch) -> Result<(), SinkError> {
        self.inner.write(batch).await?;
        if self.crash_on == Some(batch.seq) {
            return Err(SinkError::Io(std::io::Error::other("crashed after write")));
        }
        Ok(())
    }
}

/// Scratch directories for one run: checkpoint state and batch files.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Workspace {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    pub fn batch_dir(&self) -> PathBuf {
        self.dir.path().join("downloads").join(RUN)
    }

    pub async fn store(&self) -> Arc<dyn CheckpointStore> {
        Arc::new(
            FileCheckpointStore::open(self.state_dir(), RUN)
                .await
                .unwrap(),
        )
    }

    pub async fn sink(&self) -> Arc<dyn BatchSink> {
        Arc::new(CrashingSink::open(&self.batch_dir(), None).await)
    }

    pub async fn batches(&self) -> Vec<Batch> {
        load_batches(self.batch_dir()).await.unwrap()
    }

    /// Every flushed product handle, in batch order.
    pub async fn handles(&self) -> Vec<String> {
        self.batches()
            .await
            .iter()
            .flat_map(|b| b.records.iter())
            .filter_map(|r| r.key("handle"))
            .collect()
    }
}

pub fn product_normalizer() -> Normalizer {
    Normalizer::from_spec(&NormalizeSpec::Json(JsonNormalizeSpec {
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
            JsonFieldSpec {
                name: "price".into(),
                path: "variants.0.price".into(),
                required: false,
            },
        ],
        metafields: None,
    }))
    .unwrap()
}

pub fn settings() -> EngineSettings {
    EngineSettings::default()
        .with_retry_delay(Duration::ZERO)
        .with_inter_chunk_delay(Duration::ZERO)
        .with_request_timeout(Duration::from_secs(5))
}

pub async fn harvest(
    catalog: Arc<Catalog>,
    settings: EngineSettings,
    store: Arc<dyn CheckpointStore>,
    sink: Arc<dyn BatchSink>,
    cancel: CancellationToken,
) -> RunSummary {
    RunCoordinator::new(
        CoordinatorParams {
            run: RUN.into(),
            plan_hash: "plan".into(),
            settings,
            source: catalog,
            normalizer: product_normalizer(),
            store,
            sink,
        },
        cancel,
    )
    .run()
    .await
}

/// Panics when a handle was flushed twice.
pub fn assert_unique(handles: &[String]) {
    let mut seen = HashSet::new();
    for h in handles {
        assert!(seen.insert(h), "handle {h} was flushed twice");
    }
}

/// Every handle a catalog of `per_page` items serves over `cursors`.
pub fn expected_handles(cursors: impl IntoIterator<Item = u64>, per_page: usize) -> Vec<String> {
    cursors
        .into_iter()
        .flat_map(|c| (0..per_page).map(move |i| handle(c, i)))
        .collect()
}
