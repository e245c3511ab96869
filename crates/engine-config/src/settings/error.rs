use thiserror::Error;

/// Errors raised when validating engine settings or a plan's sections.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    /// A numeric setting that must be positive was zero.
    #[error("'{0}' must be greater than zero")]
    MustBePositive(&'static str),

    /// The configured upper bound lies before the start position.
    #[error("end cursor {end} is before start cursor {start}")]
    EmptyRange { start: u64, end: u64 },

    /// The exponential backoff cap would shorten the base retry delay.
    #[error("max_retry_delay_ms ({cap_ms}) is below retry_delay_ms ({delay_ms})")]
    RetryCapBelowDelay { delay_ms: u64, cap_ms: u64 },

    /// The identifying field is not one of the extracted fields.
    #[error("id field '{0}' is not declared in [normalize].fields")]
    UnknownIdField(String),

    /// A field path or selector could not be parsed.
    #[error("invalid path for field '{field}': {reason}")]
    InvalidPath { field: String, reason: String },

    /// The HTML normalizer's base URL could not be parsed.
    #[error("invalid base_url '{0}'")]
    InvalidBaseUrl(String),

    /// Two fields share the same output name.
    #[error("duplicate field name '{0}'")]
    DuplicateField(String),

    /// The source and normalizer kinds do not fit together.
    #[error("source kind '{source_kind}' cannot be used with a '{normalizer}' normalizer")]
    Incompatible {
        source_kind: &'static str,
        normalizer: &'static str,
    },
}
