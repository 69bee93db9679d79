// ABOUTME: Entry point for the teardown command line tool
// ABOUTME: Sets up logging and dispatches subcommands

use clap::{Parser, Subcommand};
use colored::*;
use std::process;

mod cli;

use cli::destroy::DestroyArgs;

#[derive(Parser)]
#[command(name = "teardown")]
#[command(about = "Teardown - destroy development environments remotely")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Destroy a development environment by running the destroy inside the cluster
    Destroy(DestroyArgs),
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Destroy(args) => args.execute().await,
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}
