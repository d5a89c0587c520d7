//! # podctl CLI Entry Point
//!
//! Assembles subcommands and dispatches to handler modules.

use clap::Parser;

/// Pod session toolkit.
///
/// Runs scripted sessions against a simulated pod and inspects persisted
/// session state.
#[derive(Parser, Debug)]
#[command(name = "podctl", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a scripted session against a simulated pod.
    Simulate(pod_cli::simulate::SimulateArgs),
    /// Print the snapshot of a persisted session.
    Status(pod_cli::status::StatusArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate(args) => pod_cli::simulate::run(&args).await,
        Commands::Status(args) => pod_cli::status::run(&args),
    }
}
