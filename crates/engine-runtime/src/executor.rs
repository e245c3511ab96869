use crate::{
    button::{ButtonHarvester, ButtonParams},
    coordinator::{CoordinatorParams, RunCoordinator},
    driver::HttpPageDriver,
    error::HarvestError,
    summary::RunSummary,
};
use engine_config::plan::{CheckpointBackend, HarvestPlan, RunSection, SourceSpec};
use engine_core::{
    error::StateStoreError,
    metrics::Metrics,
    sink::{BatchSink, json_dir::JsonDirSink},
    state::{CheckpointStore, file_store::FileCheckpointStore, sled_store::SledCheckpointStore},
};
use engine_processing::{
    fetch::{PageSource, http::HttpPageSource},
    normalize::Normalizer,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

/// Runs a plan to completion with the HTTP collaborators.
pub async fn run(plan: HarvestPlan, cancel: CancellationToken) -> Result<RunSummary, HarvestError> {
    HarvestExecutor::new(plan, cancel).await?.execute().await
}

/// Opens the checkpoint store a plan asks for.
pub async fn open_store(run: &RunSection) -> Result<Arc<dyn CheckpointStore>, HarvestError> {
    let store: Arc<dyn CheckpointStore> = match run.checkpoint {
        CheckpointBackend::File => {
            Arc::new(FileCheckpointStore::open(&run.state_dir, &run.name).await?)
        }
        CheckpointBackend::Sled => {
            tokio::fs::create_dir_all(&run.state_dir)
                .await
                .map_err(StateStoreError::Io)?;
            Arc::new(SledCheckpointStore::open(
                run.state_dir.join("state.sled"),
                &run.name,
            )?)
        }
    };
    Ok(store)
}

struct HarvestExecutor {
    plan: HarvestPlan,
    cancel: CancellationToken,
    store: Arc<dyn CheckpointStore>,
    sink: Arc<dyn BatchSink>,
    normalizer: Normalizer,
    metrics: Metrics,
}

impl HarvestExecutor {
    async fn new(plan: HarvestPlan, cancel: CancellationToken) -> Result<Self, HarvestError> {
        plan.validate()?;
        let store = open_store(&plan.run).await?;
        let sink: Arc<dyn BatchSink> = Arc::new(JsonDirSink::open(plan.run.batch_dir()).await?);
        let normalizer = Normalizer::from_spec(&plan.normalize)?;

        Ok(Self {
            plan,
            cancel,
            store,
            sink,
            normalizer,
            metrics: Metrics::new(),
        })
    }

    async fn execute(self) -> Result<RunSummary, HarvestError> {
        let attempt = Uuid::new_v4();
        let span = info_span!("harvest", run = %self.plan.run.name, attempt = %attempt);
        let plan_hash = self.plan.fingerprint();
        let settings = self.plan.engine.clone();
        let run = self.plan.run.name.clone();

        info!(
            run = %run,
            attempt = %attempt,
            plan_hash = %plan_hash,
            source = self.plan.source.kind(),
            batch_dir = %self.plan.run.batch_dir().display(),
            "Harvest plan loaded"
        );

        let summary = match &self.plan.source {
            SourceSpec::Api(api) => {
                let source: Arc<dyn PageSource> =
                    Arc::new(HttpPageSource::new(api, settings.request_timeout)?);
                RunCoordinator::new(
                    CoordinatorParams {
                        run,
                        plan_hash,
                        settings,
                        source,
                        normalizer: self.normalizer,
                        store: self.store,
                        sink: self.sink,
                    },
                    self.cancel,
                )
                .with_metrics(self.metrics)
                .run()
                .instrument(span)
                .await
            }
            SourceSpec::Pages(pages) => {
                let driver = HttpPageDriver::new(pages, settings.request_timeout)?;
                ButtonHarvester::new(
                    ButtonParams {
                        run,
                        plan_hash,
                        settings,
                        start_url: pages.start_url.clone(),
                        driver: Arc::new(driver),
                        normalizer: self.normalizer,
                        store: self.store,
                        sink: self.sink,
                    },
                    self.cancel,
                )
                .with_metrics(self.metrics)
                .run()
                .instrument(span)
                .await
            }
        };

        Ok(summary)
    }
}
