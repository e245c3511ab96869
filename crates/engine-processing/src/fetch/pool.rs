use super::PageSource;
use crate::{error::PoolError, retry::classify_fetch_error};
use engine_core::retry::{RetryPolicy, RetryState};
use futures::FutureExt;
use model::pagination::{
    cursor::Cursor,
    page::{FetchError, FetchResult, Payload},
};
use std::{any::Any, collections::VecDeque, panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// One cursor travelling through the pool with its retry progress.
#[derive(Debug, Clone, Copy)]
struct Job {
    cursor: Cursor,
    state: RetryState,
}

/// Shared by every worker and retry timer.
struct WorkerContext {
    source: Arc<dyn PageSource>,
    policy: RetryPolicy,
    request_timeout: Duration,
    queue_tx: mpsc::UnboundedSender<Job>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<Job>>,
    results_tx: mpsc::UnboundedSender<FetchResult>,
    cancel: CancellationToken,
}

/// Bounded fetch executor.
///
/// `concurrency` workers pull cursors from one shared queue, so at most that
/// many requests are in flight. A transient failure parks the cursor on a
/// timer for the retry delay and frees the worker; when the timer fires the
/// cursor goes back on the queue. Each cursor yields exactly one
/// [`FetchResult`], in completion order: callers correlate by cursor.
pub struct FetchPool {
    ctx: Arc<WorkerContext>,
    results_rx: mpsc::UnboundedReceiver<FetchResult>,
    /// Results taken out of order by [`FetchPool::submit`].
    stashed: VecDeque<FetchResult>,
    workers: Vec<JoinHandle<()>>,
    in_flight: usize,
}

impl FetchPool {
    pub fn spawn(
        source: Arc<dyn PageSource>,
        concurrency: usize,
        policy: RetryPolicy,
        request_timeout: Duration,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let ctx = Arc::new(WorkerContext {
            source,
            policy,
            request_timeout,
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            results_tx,
            cancel: CancellationToken::new(),
        });

        let workers = (0..concurrency.max(1))
            .map(|id| tokio::spawn(worker_loop(id, ctx.clone())))
            .collect();

        FetchPool {
            ctx,
            results_rx,
            stashed: VecDeque::new(),
            workers,
            in_flight: 0,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.workers.len()
    }

    /// Cursors dispatched whose result has not been collected yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Queues cursors in order. Returns how many were queued.
    pub fn dispatch(
        &mut self,
        cursors: impl IntoIterator<Item = Cursor>,
    ) -> Result<usize, PoolError> {
        let mut queued = 0;
        for cursor in cursors {
            self.ctx
                .queue_tx
                .send(Job {
                    cursor,
                    state: RetryState::Pending,
                })
                .map_err(|_| PoolError::QueueClosed)?;
            queued += 1;
        }
        self.in_flight += queued;
        Ok(queued)
    }

    /// Next terminal result, or `None` once nothing is in flight.
    pub async fn next_result(&mut self) -> Option<FetchResult> {
        if let Some(result) = self.stashed.pop_front() {
            return Some(result);
        }
        if self.in_flight == 0 {
            return None;
        }

        let result = self.results_rx.recv().await?;
        self.in_flight -= 1;
        Some(result)
    }

    /// Fetches a single cursor and waits for its result. Results of other
    /// in-flight cursors that finish first stay available to
    /// [`FetchPool::next_result`].
    pub async fn submit(&mut self, cursor: Cursor) -> Result<FetchResult, PoolError> {
        self.dispatch([cursor])?;

        loop {
            let result = self
                .results_rx
                .recv()
                .await
                .ok_or(PoolError::ResultsClosed(cursor))?;
            self.in_flight -= 1;
            if result.cursor == cursor {
                return Ok(result);
            }
            self.stashed.push_back(result);
        }
    }

    /// Stops the workers and waits for them. Parked retries are dropped.
    pub async fn shutdown(self) {
        self.ctx.cancel.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Fetch worker ended abnormally");
            }
        }
    }
}

async fn worker_loop(id: usize, ctx: Arc<WorkerContext>) {
    debug!(worker = id, "Fetch worker started");

    loop {
        let job = {
            let mut queue = ctx.queue_rx.lock().await;
            tokio::select! {
                _ = ctx.cancel.cancelled() => None,
                job = queue.recv() => job,
            }
        };
        let Some(job) = job else { break };

        process_job(&ctx, job).await;
    }

    debug!(worker = id, "Fetch worker stopped");
}

async fn process_job(ctx: &Arc<WorkerContext>, job: Job) {
    let state = job.state.begin();
    let attempt = state.attempts();
    let cursor = job.cursor;

    let error = match attempt_fetch(ctx, cursor).await {
        Ok(payload) => {
            let _ = ctx
                .results_tx
                .send(FetchResult::success(cursor, payload, attempt));
            return;
        }
        Err(e) => e,
    };

    match state.fail(&ctx.policy, classify_fetch_error(&error)) {
        next @ RetryState::Retrying { delay, .. } => {
            warn!(
                cursor = %cursor,
                attempt,
                max_attempts = ctx.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Fetch failed, retrying"
            );
            park(ctx.clone(), Job { cursor, state: next }, delay);
        }
        RetryState::PermanentlyFailed {
            attempts,
            exhausted,
        } => {
            if exhausted {
                error!(
                    severity = "critical",
                    cursor = %cursor,
                    attempts,
                    error = %error,
                    "Fetch failed after all attempts"
                );
            } else {
                warn!(cursor = %cursor, attempts, error = %error, "Fetch failed permanently");
            }
            let _ = ctx
                .results_tx
                .send(FetchResult::failure(cursor, error, attempts));
        }
        other => {
            let _ = ctx
                .results_tx
                .send(FetchResult::failure(cursor, error, other.attempts()));
        }
    }
}

/// One attempt under the request timeout. A panic in the source is caught
/// and reported for this cursor only.
async fn attempt_fetch(
    ctx: &WorkerContext,
    cursor: Cursor,
) -> Result<Payload, FetchError> {
    let fut = AssertUnwindSafe(ctx.source.fetch_page(cursor)).catch_unwind();
    match timeout(ctx.request_timeout, fut).await {
        Err(_) => Err(FetchError::Timeout(ctx.request_timeout)),
        Ok(Err(panic)) => {
            let message = panic_message(panic.as_ref());
            error!(severity = "critical", cursor = %cursor, panic = %message, "Fetch panicked");
            Err(FetchError::Unexpected(message))
        }
        Ok(Ok(result)) => result,
    }
}

/// Puts the job back on the queue after `delay` without holding a worker.
fn park(ctx: Arc<WorkerContext>, job: Job, delay: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {}
            _ = sleep(delay) => {
                let _ = ctx.queue_tx.send(job);
            }
        }
    });
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "fetch panicked".to_string()
    }
}
