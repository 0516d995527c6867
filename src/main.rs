mod client;
mod cmd;
mod config;
mod graph;
mod probe;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::DockerArgs;

#[derive(Parser)]
#[command(name = "dlayer")]
#[command(about = "Report layer sharing and wasted space in a Docker image store")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    docker: DockerArgs,

    /// Output as JSON (optionally to a file)
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "-")]
    json: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Output layer sizes: total, reachable from tags, shared and dangling
    Sizes,

    /// Find a Docker endpoint and print it
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let hints = cli.docker.hints();

    // `dlayer` on its own is shorthand for `dlayer sizes`
    match cli.command.unwrap_or(Commands::Sizes) {
        Commands::Sizes => cmd::sizes::run(hints, cli.json.as_deref()).await,
        Commands::Probe => cmd::probe::run(hints, cli.json.as_deref()).await,
    }
}
