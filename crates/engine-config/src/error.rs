use crate::settings::error::SettingsError;
use thiserror::Error;

/// Errors raised while loading a harvest plan from disk.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Failed to read plan file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse plan: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Undefined variable '${{{0}}}' in plan")]
    UndefinedVariable(String),

    #[error("Unterminated variable reference at byte {0}")]
    UnterminatedVariable(usize),

    #[error("Invalid env file: {0}")]
    EnvFile(String),

    #[error("Invalid plan: {0}")]
    Settings(#[from] SettingsError),
}
