use engine_config::error::PlanError;
use engine_core::error::{ProgressError, SinkError};
use engine_runtime::error::HarvestError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to load the harvest plan: {0}")]
    Plan(#[from] PlanError),

    #[error("Failed to run the harvest: {0}")]
    Runner(#[from] HarvestError),

    #[error("Failed to load progress: {0}")]
    Progress(#[from] ProgressError),

    #[error("Failed to merge batches: {0}")]
    Merge(#[from] SinkError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to set up logging: {0}")]
    Logging(String),

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),
}
