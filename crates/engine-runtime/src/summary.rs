use crate::error::HarvestError;
use engine_core::{
    metrics::{Metrics, RunState},
    state::models::Checkpoint,
};
use engine_processing::state_manager::StateManager;
use model::pagination::cursor::Cursor;
use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

/// Lifecycle of a run. `Failed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    Init,
    Resuming,
    Running,
    Draining,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Init => "INIT",
            RunPhase::Resuming => "RESUMING",
            RunPhase::Running => "RUNNING",
            RunPhase::Draining => "DRAINING",
            RunPhase::Done => "DONE",
            RunPhase::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Why a run stopped dispatching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TerminationReason {
    /// The bounded cursor range was fully dispatched.
    Exhausted,
    /// A page past the first chunk had no items.
    EndOfData { cursor: Cursor },
    /// The pagination control reported itself disabled.
    PaginationDisabled,
    /// Shutdown was requested.
    Cancelled,
    /// Too many consecutive unexpected fetch errors.
    UnexpectedErrorsRecurring,
    /// The page driver kept failing to advance.
    DriverStalled,
}

impl TerminationReason {
    /// Whether the run stopped without reaching the end of the data.
    pub fn is_abnormal(&self) -> bool {
        matches!(
            self,
            TerminationReason::UnexpectedErrorsRecurring | TerminationReason::DriverStalled
        )
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Exhausted => f.write_str("cursor range exhausted"),
            TerminationReason::EndOfData { cursor } => write!(f, "end of data at cursor {cursor}"),
            TerminationReason::PaginationDisabled => f.write_str("pagination control disabled"),
            TerminationReason::Cancelled => f.write_str("cancelled"),
            TerminationReason::UnexpectedErrorsRecurring => {
                f.write_str("unexpected errors recurring")
            }
            TerminationReason::DriverStalled => f.write_str("page driver stalled"),
        }
    }
}

/// Final account of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run: String,
    pub phase: RunPhase,
    pub reason: Option<TerminationReason>,
    /// Set when the run ended `Failed`.
    pub error: Option<String>,
    pub state: RunState,
    pub checkpoint: Option<Checkpoint>,
    pub gaps: Vec<Cursor>,
}

impl RunSummary {
    pub fn is_failed(&self) -> bool {
        self.phase == RunPhase::Failed
    }

    pub fn was_cancelled(&self) -> bool {
        self.reason == Some(TerminationReason::Cancelled)
    }

    /// Whether the process should exit non-zero.
    pub fn is_unsuccessful(&self) -> bool {
        self.is_failed() || self.reason.is_some_and(|r| r.is_abnormal())
    }
}

/// Journals how the run ended and builds its summary.
pub(crate) async fn conclude(
    state: &StateManager,
    metrics: &Metrics,
    outcome: Result<TerminationReason, HarvestError>,
) -> RunSummary {
    let (phase, reason, error) = match outcome {
        Ok(reason) => match state.finish(&reason.to_string()).await {
            Ok(()) => (RunPhase::Done, Some(reason), None),
            Err(e) => {
                error!(
                    severity = "critical",
                    run = %state.run(),
                    error = %e,
                    "Failed to journal run end"
                );
                (RunPhase::Failed, Some(reason), Some(e.to_string()))
            }
        },
        Err(e) => {
            error!(severity = "critical", run = %state.run(), error = %e, "Run failed");
            if let Err(journal_err) = state.fail(&e.to_string()).await {
                warn!(error = %journal_err, "Failed to journal run failure");
            }
            (RunPhase::Failed, None, Some(e.to_string()))
        }
    };

    let summary = RunSummary {
        run: state.run().to_string(),
        phase,
        reason,
        error,
        state: metrics.run_state(),
        checkpoint: state.checkpoint().cloned(),
        gaps: state.gaps(),
    };

    let counters = summary.state.counters;
    info!(
        run = %summary.run,
        phase = %summary.phase,
        reason = ?summary.reason,
        fetched = counters.pages_fetched,
        failed = counters.pages_failed,
        gaps = counters.gaps,
        records = counters.records_flushed,
        batches = counters.batches_flushed,
        "Run finished"
    );
    summary
}
