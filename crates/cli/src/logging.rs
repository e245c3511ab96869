use crate::error::CliError;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Console logging at `info` (`debug` with `verbose`), overridable through
/// `RUST_LOG`. With `error_log`, errors are also appended to that file; the
/// returned guard must live until exit so buffered lines get written.
pub fn init(verbose: bool, error_log: Option<&Path>) -> Result<Option<WorkerGuard>, CliError> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let console = fmt::layer().with_target(false).with_filter(filter);

    let (errors, guard) = match error_log {
        Some(path) => {
            let file = path.file_name().ok_or_else(|| {
                CliError::Logging(format!("'{}' is not a file path", path.display()))
            })?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            std::fs::create_dir_all(dir)?;

            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file));
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(LevelFilter::ERROR);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(errors)
        .try_init()
        .map_err(|e| CliError::Logging(e.to_string()))?;

    Ok(guard)
}
