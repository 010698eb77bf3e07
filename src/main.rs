//! evalbot - multi-turn, tool-using benchmark evaluator for black-box agents.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use evalbot::cli::{init_command, report_command, run_command, tasks_command, RunOverrides};

pub(crate) const VERSION: &str = "0.1.0";

#[derive(Parser)]
#[command(name = "evalbot", about = "evalbot - agent benchmark evaluator", version = VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the benchmark against an agent endpoint.
    Run {
        /// Path to the task catalog JSON file.
        #[arg(short, long)]
        tasks: PathBuf,
        /// Path to the config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Agent endpoint URL (overrides config).
        #[arg(short, long)]
        agent_url: Option<String>,
        /// Trial count k per task (overrides config).
        #[arg(short = 'k', long)]
        trials: Option<u32>,
        /// Maximum trials in flight (overrides config).
        #[arg(long)]
        concurrency: Option<usize>,
        /// Output path for the result record (overrides config).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Re-print the summary from a persisted result record.
    Report {
        /// Path to a results JSON file.
        #[arg(short, long)]
        input: PathBuf,
    },
    /// List the tasks in a catalog file.
    Tasks {
        /// Path to the task catalog JSON file.
        #[arg(short, long)]
        tasks: PathBuf,
    },
    /// Write a default config file.
    Init {
        /// Destination path for the config file.
        #[arg(short, long, default_value = "evalbot.json")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            tasks,
            config,
            agent_url,
            trials,
            concurrency,
            output,
        } => {
            let overrides = RunOverrides {
                agent_url,
                trials,
                concurrency,
                output,
            };
            run_command(&tasks, config.as_deref(), overrides).await
        }
        Commands::Report { input } => report_command(&input),
        Commands::Tasks { tasks } => tasks_command(&tasks),
        Commands::Init { config } => init_command(&config),
    }
}
