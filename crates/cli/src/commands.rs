use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a harvest plan, resuming from its checkpoint if there is one
    Run {
        #[arg(long, help = "Harvest plan file (TOML)")]
        plan: PathBuf,

        #[arg(long, help = "Extra variables for ${VAR} expansion in the plan")]
        env_file: Option<PathBuf>,
    },
    /// Validate a plan without fetching anything
    Check {
        #[arg(long, help = "Harvest plan file (TOML)")]
        plan: PathBuf,

        #[arg(long, help = "Extra variables for ${VAR} expansion in the plan")]
        env_file: Option<PathBuf>,
    },
    /// Show the durable progress of a plan's run
    Status {
        #[arg(long, help = "Harvest plan file (TOML)")]
        plan: PathBuf,

        #[arg(long, help = "Extra variables for ${VAR} expansion in the plan")]
        env_file: Option<PathBuf>,

        #[arg(
            long,
            help = "If set, prints the status as JSON instead of a table"
        )]
        json: bool,
    },
    /// Merge flushed batches into one CSV, deduplicated by key
    Merge {
        #[arg(
            long,
            conflicts_with = "dir",
            help = "Take the batch directory and key field from this plan"
        )]
        plan: Option<PathBuf>,

        #[arg(long, help = "Batch directory to merge")]
        dir: Option<PathBuf>,

        #[arg(long, help = "Output CSV path")]
        out: PathBuf,

        #[arg(long, help = "Dedup key field; defaults to the plan's id field")]
        key: Option<String>,

        #[arg(long, help = "Extra variables for ${VAR} expansion in the plan")]
        env_file: Option<PathBuf>,
    },
}
