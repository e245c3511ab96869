use crate::driver::DriverError;
use engine_config::settings::error::SettingsError;
use engine_core::error::{SinkError, StateStoreError};
use engine_processing::error::{PoolError, SourceBuildError};
use thiserror::Error;

/// Top-level errors of a harvest run.
///
/// Only storage failures stop a run once it is under way; everything else
/// here is raised while wiring a plan to its components.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Checkpoint or journal could not be read or written.
    #[error("State store error: {0}")]
    State(#[from] StateStoreError),

    /// A batch could not be written.
    #[error("Batch sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Source setup error: {0}")]
    SourceBuild(#[from] SourceBuildError),

    #[error("Page driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Fetch pool error: {0}")]
    Pool(#[from] PoolError),
}
