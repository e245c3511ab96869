use crate::{error::CliError, shutdown::ExitCode, shutdown::ShutdownCoordinator};
use clap::Parser;
use commands::Commands;
use engine_config::{env::EnvManager, plan::HarvestPlan};
use engine_core::{export::merge_batches_to_csv, progress::ProgressService};
use engine_runtime::executor;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod commands;
mod error;
mod logging;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(name = "harvest", version = "0.1.0", about = "Resumable catalog harvester")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, global = true, help = "Log at debug level")]
    verbose: bool,

    #[arg(long, global = true, help = "Also append errors to this file")]
    error_log: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let guard = match logging::init(cli.verbose, cli.error_log.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(ExitCode::GeneralError.as_i32());
        }
    };

    let code = match execute(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::GeneralError
        }
    };

    // process::exit skips destructors; flush the error log first.
    drop(guard);
    std::process::exit(code.as_i32());
}

async fn execute(command: Commands) -> Result<ExitCode, CliError> {
    match command {
        Commands::Run { plan, env_file } => {
            let plan = load_plan(&plan, env_file.as_deref())?;
            info!(run = %plan.run.name, source = plan.source.kind(), "Starting harvest");

            let shutdown = ShutdownCoordinator::new(CancellationToken::new());
            shutdown.register_handlers();

            let summary = executor::run(plan, shutdown.cancel_token()).await?;
            output::print_summary(&summary);

            if summary.was_cancelled() || shutdown.is_shutdown_requested() {
                Ok(ExitCode::ShutdownRequested)
            } else if summary.is_unsuccessful() {
                Ok(ExitCode::GeneralError)
            } else {
                Ok(ExitCode::Success)
            }
        }
        Commands::Check { plan, env_file } => {
            // Loading already validates.
            let plan = load_plan(&plan, env_file.as_deref())?;
            output::print_check(&plan);
            Ok(ExitCode::Success)
        }
        Commands::Status {
            plan,
            env_file,
            json,
        } => {
            let plan = load_plan(&plan, env_file.as_deref())?;
            let store = executor::open_store(&plan.run).await?;
            let status = ProgressService::new(store).status().await?;

            if json {
                output::print_json(&status)?;
            } else {
                output::print_status(&plan.run.name, &status);
            }
            Ok(ExitCode::Success)
        }
        Commands::Merge {
            plan,
            dir,
            out,
            key,
            env_file,
        } => {
            let (dir, key) = match (plan, dir) {
                (Some(plan), _) => {
                    let plan = load_plan(&plan, env_file.as_deref())?;
                    let key = key.unwrap_or_else(|| plan.normalize.id_field().to_string());
                    (plan.run.batch_dir(), key)
                }
                (None, Some(dir)) => (dir, key.ok_or(CliError::MissingArgument("--key"))?),
                (None, None) => return Err(CliError::MissingArgument("--plan or --dir")),
            };

            info!(dir = %dir.display(), key = %key, "Merging batches");
            let report = merge_batches_to_csv(&dir, &out, &key).await?;
            output::print_merge(&report);
            Ok(ExitCode::Success)
        }
    }
}

fn load_plan(path: &Path, env_file: Option<&Path>) -> Result<HarvestPlan, CliError> {
    let mut env = EnvManager::new();
    if let Some(env_file) = env_file {
        env.load_from_file(env_file)?;
    }
    Ok(HarvestPlan::load(path, &env)?)
}
