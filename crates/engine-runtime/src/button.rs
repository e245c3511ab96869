use crate::{
    coordinator::flush_and_commit,
    driver::{ClickOutcome, DriverError, PageDriver},
    error::HarvestError,
    summary::{RunPhase, RunSummary, TerminationReason, conclude},
};
use engine_config::settings::EngineSettings;
use engine_core::{
    metrics::{Metrics, format_elapsed},
    retry::{RetryDisposition, RetryError, RetryPolicy},
    sink::BatchSink,
    state::CheckpointStore,
};
use engine_processing::{
    accumulator::BatchAccumulator, normalize::Normalizer, state_manager::StateManager,
};
use model::pagination::{cursor::Cursor, page::Payload};
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ButtonParams {
    pub run: String,
    pub plan_hash: String,
    pub settings: EngineSettings,
    pub start_url: String,
    pub driver: Arc<dyn PageDriver>,
    pub normalizer: Normalizer,
    pub store: Arc<dyn CheckpointStore>,
    pub sink: Arc<dyn BatchSink>,
}

/// Harvests a listing whose pages are reached through a "next" control.
///
/// Strictly sequential. The cursor is the page number, starting at the
/// configured start for the start URL. The run ends when the control
/// reports itself disabled.
pub struct ButtonHarvester {
    settings: EngineSettings,
    start_url: String,
    driver: Arc<dyn PageDriver>,
    normalizer: Normalizer,
    sink: Arc<dyn BatchSink>,
    state: StateManager,
    plan_hash: String,
    policy: RetryPolicy,
    metrics: Metrics,
    cancel: CancellationToken,
    phase: RunPhase,
}

impl ButtonHarvester {
    pub fn new(params: ButtonParams, cancel: CancellationToken) -> Self {
        let policy = RetryPolicy::from_settings(&params.settings);
        ButtonHarvester {
            settings: params.settings,
            start_url: params.start_url,
            driver: params.driver,
            normalizer: params.normalizer,
            sink: params.sink,
            state: StateManager::new(params.run, params.store),
            plan_hash: params.plan_hash,
            policy,
            metrics: Metrics::new(),
            cancel,
            phase: RunPhase::Init,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub async fn run(mut self) -> RunSummary {
        info!(
            run = %self.state.run(),
            start_url = %self.start_url,
            "Starting paginated harvest"
        );
        let outcome = self.execute().await;
        conclude(&self.state, &self.metrics, outcome).await
    }

    async fn execute(&mut self) -> Result<TerminationReason, HarvestError> {
        self.phase = RunPhase::Resuming;
        let checkpoint = self.state.begin(&self.plan_hash).await?;
        let first_page = Cursor::new(self.settings.start);
        let page = checkpoint
            .as_ref()
            .map_or(first_page, |cp| cp.resume_cursor().max(first_page));

        let mut accumulator = BatchAccumulator::new(
            self.sink.clone(),
            self.settings.flush_threshold,
            self.state.next_batch_seq(),
        );

        self.phase = RunPhase::Running;
        let (reason, last_processed) = match self.reach(first_page, page).await {
            Ok(()) => self.page_loop(page, &mut accumulator).await?,
            Err(reason) => (reason, None),
        };

        self.phase = RunPhase::Draining;
        info!(
            run = %self.state.run(),
            reason = %reason,
            buffered = accumulator.len(),
            "Draining"
        );
        flush_and_commit(
            &mut accumulator,
            &mut self.state,
            &self.metrics,
            last_processed,
            true,
        )
        .await?;

        Ok(reason)
    }

    /// Brings the driver to `page`. Direct navigation when the driver can
    /// address pages, otherwise load the start URL and click forward.
    ///
    /// A resume page that does not exist means the previous run already
    /// reached the last page.
    async fn reach(&self, first_page: Cursor, page: Cursor) -> Result<(), TerminationReason> {
        if page > first_page
            && self.driver.supports_direct_navigation()
            && let Some(url) = self.driver.page_url(page)
        {
            info!(page = %page, url = %url, "Navigating directly to resume page");
            return match self.navigate(&url).await {
                Ok(()) => Ok(()),
                Err(RetryError::Fatal(e)) if e.is_not_found() => {
                    info!(
                        run = %self.state.run(),
                        page = %page,
                        "Resume page does not exist, listing already complete"
                    );
                    Err(TerminationReason::PaginationDisabled)
                }
                Err(e) => Err(stalled(&url, e.into_inner())),
            };
        }

        self.navigate(&self.start_url)
            .await
            .map_err(|e| stalled(&self.start_url, e.into_inner()))?;

        let clicks = page.value().saturating_sub(first_page.value());
        if clicks > 0 {
            info!(page = %page, clicks, "Replaying pagination to reach resume page");
        }
        for _ in 0..clicks {
            if self.cancel.is_cancelled() {
                return Err(TerminationReason::Cancelled);
            }
            self.click_next().await?;
        }
        Ok(())
    }

    async fn page_loop(
        &mut self,
        mut page: Cursor,
        accumulator: &mut BatchAccumulator,
    ) -> Result<(TerminationReason, Option<Cursor>), HarvestError> {
        let end = self.settings.end.map(Cursor::new);
        let mut last_processed = None;

        loop {
            if self.cancel.is_cancelled() {
                info!(run = %self.state.run(), "Shutdown requested, stopping pagination");
                return Ok((TerminationReason::Cancelled, last_processed));
            }

            self.harvest_page(page, accumulator).await?;
            last_processed = Some(page);

            if accumulator.should_flush() {
                flush_and_commit(
                    accumulator,
                    &mut self.state,
                    &self.metrics,
                    last_processed,
                    false,
                )
                .await?;
            }

            let totals = self.metrics.snapshot();
            info!(
                run = %self.state.run(),
                page = %page,
                buffered = accumulator.len(),
                total_records = totals.records_normalized,
                total_flushed = totals.records_flushed,
                elapsed = %format_elapsed(self.metrics.elapsed()),
                "Page processed"
            );

            if end.is_some_and(|end| page >= end) {
                return Ok((TerminationReason::Exhausted, last_processed));
            }

            if !self.settings.inter_chunk_delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        return Ok((TerminationReason::Cancelled, last_processed));
                    }
                    _ = sleep(self.settings.inter_chunk_delay) => {}
                }
            }

            match self.click_next().await {
                Ok(()) => page = page.next(),
                Err(reason) => return Ok((reason, last_processed)),
            }
        }
    }

    /// Reads and normalizes the current page. A page whose markup cannot be
    /// read becomes a gap.
    async fn harvest_page(
        &mut self,
        page: Cursor,
        accumulator: &mut BatchAccumulator,
    ) -> Result<(), HarvestError> {
        let markup = match self.driver.current_markup().await {
            Ok(markup) => markup,
            Err(e) => {
                warn!(page = %page, error = %e, "Could not read page markup");
                self.metrics.increment_failed(1);
                self.metrics.increment_gaps(1);
                self.state.record_gap(page, 1, &e.to_string()).await?;
                return Ok(());
            }
        };

        self.metrics.increment_fetched(1);
        let normalized = self.normalizer.normalize(page, &Payload::Markup(markup));
        self.metrics
            .increment_records(normalized.records.len() as u64);
        self.metrics
            .increment_mapping_errors(normalized.errors.len() as u64);
        debug!(page = %page, records = normalized.records.len(), "Normalized page");

        accumulator.extend(page, normalized.records);
        Ok(())
    }

    /// Loads `url`, retrying everything except a missing page.
    async fn navigate(&self, url: &str) -> Result<(), RetryError<DriverError>> {
        let driver = &self.driver;
        self.policy
            .run(
                || async move { driver.navigate(url).await },
                |e: &DriverError| {
                    if e.is_not_found() {
                        RetryDisposition::Stop
                    } else {
                        RetryDisposition::Retry
                    }
                },
            )
            .await
    }

    /// Presses "next", retrying failed clicks. `Err` carries the reason to
    /// stop: the control is disabled or the driver is stuck.
    async fn click_next(&self) -> Result<(), TerminationReason> {
        let driver = &self.driver;
        let result = self
            .policy
            .run(
                || async move {
                    match driver.click_next().await {
                        ClickOutcome::Failed(reason) => Err(reason),
                        other => Ok(other),
                    }
                },
                |_| RetryDisposition::Retry,
            )
            .await;

        match result {
            Ok(ClickOutcome::Advanced) => Ok(()),
            Ok(_) => {
                info!(run = %self.state.run(), "Next control is disabled, no more pages");
                Err(TerminationReason::PaginationDisabled)
            }
            Err(RetryError::AttemptsExceeded(reason) | RetryError::Fatal(reason)) => {
                error!(
                    severity = "critical",
                    attempts = self.policy.max_attempts,
                    error = %reason,
                    "Next control kept failing"
                );
                Err(TerminationReason::DriverStalled)
            }
        }
    }
}

fn stalled(url: &str, err: DriverError) -> TerminationReason {
    error!(
        severity = "critical",
        url = %url,
        error = %err,
        "Navigation kept failing"
    );
    TerminationReason::DriverStalled
}
