use crate::{
    error::HarvestError,
    summary::{RunPhase, RunSummary, TerminationReason, conclude},
};
use engine_config::settings::EngineSettings;
use engine_core::{
    metrics::{Metrics, format_elapsed},
    retry::RetryPolicy,
    sink::BatchSink,
    state::CheckpointStore,
};
use engine_processing::{
    accumulator::BatchAccumulator,
    breaker::{UnexpectedErrorBreaker, Verdict},
    fetch::{PageSource, pool::FetchPool},
    normalize::Normalizer,
    sequencer::CursorSequencer,
    state_manager::StateManager,
};
use model::pagination::{
    cursor::Cursor,
    page::{FetchOutcome, FetchResult, Payload},
};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Everything a coordinator is built from.
pub struct CoordinatorParams {
    pub run: String,
    pub plan_hash: String,
    pub settings: EngineSettings,
    pub source: Arc<dyn PageSource>,
    pub normalizer: Normalizer,
    pub store: Arc<dyn CheckpointStore>,
    pub sink: Arc<dyn BatchSink>,
}

/// Drives a cursor-addressed harvest:
///
/// ```text
/// INIT -> RESUMING -> RUNNING -> DRAINING -> DONE
///            \           \          \
///             +-----------+----------+--> FAILED
/// ```
///
/// Fetches run in parallel inside the pool, but results are processed one
/// at a time here, so the accumulator and counters have a single writer.
pub struct RunCoordinator {
    settings: EngineSettings,
    source: Arc<dyn PageSource>,
    normalizer: Normalizer,
    sink: Arc<dyn BatchSink>,
    state: StateManager,
    plan_hash: String,
    metrics: Metrics,
    cancel: CancellationToken,
    phase: RunPhase,
}

/// Per-chunk tallies, reset every chunk.
#[derive(Debug, Default)]
struct ChunkReport {
    records: usize,
    gaps: usize,
    empty_page: Option<Cursor>,
    cool_down: Duration,
}

impl RunCoordinator {
    pub fn new(params: CoordinatorParams, cancel: CancellationToken) -> Self {
        RunCoordinator {
            settings: params.settings,
            source: params.source,
            normalizer: params.normalizer,
            sink: params.sink,
            state: StateManager::new(params.run, params.store),
            plan_hash: params.plan_hash,
            metrics: Metrics::new(),
            cancel,
            phase: RunPhase::Init,
        }
    }

    /// Shares counters with an outside reader.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.clone()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub async fn run(mut self) -> RunSummary {
        info!(run = %self.state.run(), "Starting harvest");
        let outcome = self.execute().await;
        conclude(&self.state, &self.metrics, outcome).await
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!(run = %self.state.run(), from = %self.phase, to = %phase, "Phase change");
        self.phase = phase;
    }

    async fn execute(&mut self) -> Result<TerminationReason, HarvestError> {
        self.enter(RunPhase::Resuming);
        let checkpoint = self.state.begin(&self.plan_hash).await?;

        let mut sequencer = CursorSequencer::resume(
            Cursor::new(self.settings.start),
            checkpoint.as_ref().map(|cp| cp.position),
            self.settings.end.map(Cursor::new),
        );
        let mut accumulator = BatchAccumulator::new(
            self.sink.clone(),
            self.settings.flush_threshold,
            self.state.next_batch_seq(),
        );
        let mut pool = FetchPool::spawn(
            self.source.clone(),
            self.settings.concurrency,
            RetryPolicy::from_settings(&self.settings),
            self.settings.request_timeout,
        );

        self.enter(RunPhase::Running);
        let outcome = self
            .dispatch_loop(&mut sequencer, &mut accumulator, &mut pool)
            .await;
        pool.shutdown().await;
        let (reason, last_processed) = outcome?;

        self.enter(RunPhase::Draining);
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

    /// Dispatches chunk after chunk until a termination condition fires.
    /// Returns the reason and the last cursor whose chunk fully drained.
    async fn dispatch_loop(
        &mut self,
        sequencer: &mut CursorSequencer,
        accumulator: &mut BatchAccumulator,
        pool: &mut FetchPool,
    ) -> Result<(TerminationReason, Option<Cursor>), HarvestError> {
        let chunk_len = self.settings.chunk_len();
        let mut breaker = UnexpectedErrorBreaker::new(
            self.settings.unexpected_error_threshold,
            self.settings.retry_delay,
            self.settings.max_retry_delay,
        );
        let mut last_processed = None;
        let mut first_chunk = true;

        loop {
            if self.cancel.is_cancelled() {
                info!(run = %self.state.run(), "Shutdown requested, stopping dispatch");
                return Ok((TerminationReason::Cancelled, last_processed));
            }

            let chunk = sequencer.next_chunk(chunk_len);
            let (Some(&first), Some(&last)) = (chunk.first(), chunk.last()) else {
                return Ok((TerminationReason::Exhausted, last_processed));
            };

            pool.dispatch(chunk)?;
            let mut report = ChunkReport::default();
            while let Some(result) = pool.next_result().await {
                self.process_result(result, accumulator, &mut breaker, &mut report)
                    .await?;
            }
            last_processed = Some(last);

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
            self.log_progress(first, last, &report, accumulator);

            if breaker.is_tripped() {
                error!(
                    severity = "critical",
                    run = %self.state.run(),
                    consecutive = breaker.streak(),
                    "Unexpected errors keep recurring, stopping dispatch"
                );
                return Ok((TerminationReason::UnexpectedErrorsRecurring, last_processed));
            }

            if !first_chunk
                && self.settings.stop_on_empty_page
                && let Some(cursor) = report.empty_page
            {
                info!(
                    run = %self.state.run(),
                    cursor = %cursor,
                    "Page had no items, treating as end of data"
                );
                return Ok((TerminationReason::EndOfData { cursor }, last_processed));
            }

            if sequencer.is_exhausted() {
                return Ok((TerminationReason::Exhausted, last_processed));
            }
            first_chunk = false;

            let pause = self.settings.inter_chunk_delay.max(report.cool_down);
            if !pause.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = sleep(pause) => {}
                }
            }
        }
    }

    /// The single place results mutate run state.
    async fn process_result(
        &mut self,
        result: FetchResult,
        accumulator: &mut BatchAccumulator,
        breaker: &mut UnexpectedErrorBreaker,
        report: &mut ChunkReport,
    ) -> Result<(), HarvestError> {
        let cursor = result.cursor;
        self.metrics
            .increment_retries(u64::from(result.attempts.saturating_sub(1)));

        if let Verdict::CoolDown(delay) = breaker.observe(&result.outcome) {
            report.cool_down = report.cool_down.max(delay);
        }

        match result.outcome {
            FetchOutcome::Success(payload) => {
                self.metrics.increment_fetched(1);
                self.absorb_page(cursor, &payload, accumulator, report);
            }
            FetchOutcome::Failure(err) => {
                self.metrics.increment_failed(1);
                self.metrics.increment_gaps(1);
                if err.is_unexpected() {
                    self.metrics.increment_unexpected(1);
                }
                report.gaps += 1;

                self.state
                    .record_gap(cursor, result.attempts, &err.to_string())
                    .await?;
            }
        }
        Ok(())
    }

    fn absorb_page(
        &self,
        cursor: Cursor,
        payload: &Payload,
        accumulator: &mut BatchAccumulator,
        report: &mut ChunkReport,
    ) {
        let normalized = self.normalizer.normalize(cursor, payload);
        self.metrics
            .increment_records(normalized.records.len() as u64);
        self.metrics
            .increment_mapping_errors(normalized.errors.len() as u64);

        if normalized.is_empty_page() {
            debug!(cursor = %cursor, "Page has no items");
            report.empty_page = Some(report.empty_page.map_or(cursor, |c| c.min(cursor)));
        }

        report.records += normalized.records.len();
        accumulator.extend(cursor, normalized.records);
    }

    fn log_progress(
        &self,
        first: Cursor,
        last: Cursor,
        report: &ChunkReport,
        accumulator: &BatchAccumulator,
    ) {
        let totals = self.metrics.snapshot();
        info!(
            run = %self.state.run(),
            cursors = %format!("{first}..={last}"),
            records = report.records,
            gaps = report.gaps,
            buffered = accumulator.len(),
            total_records = totals.records_normalized,
            total_flushed = totals.records_flushed,
            total_gaps = totals.gaps,
            elapsed = %format_elapsed(self.metrics.elapsed()),
            "Chunk processed"
        );
    }
}

/// Flushes the buffer and moves the checkpoint to `position`, in that
/// order. With `force`, the checkpoint also moves when there was nothing
/// to flush.
pub(crate) async fn flush_and_commit(
    accumulator: &mut BatchAccumulator,
    state: &mut StateManager,
    metrics: &Metrics,
    position: Option<Cursor>,
    force: bool,
) -> Result<(), HarvestError> {
    let flushed = accumulator.flush().await?;
    if let Some(batch) = &flushed {
        metrics.increment_flushed(batch.record_count as u64);
    }

    if let Some(position) = position
        && (flushed.is_some() || force)
    {
        state
            .commit(flushed.as_ref(), position, accumulator.next_seq())
            .await?;
    }
    Ok(())
}
