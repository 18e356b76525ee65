//! Stagehand CLI and REST API entry point.
//!
//! Binary name: `stagehand`
//!
//! Parses CLI arguments, installs tracing, wires the workflow backbone, then
//! dispatches to the requested command.

mod cli;
mod http;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use stagehand_observe::tracing_setup::{
    filter_for_verbosity, init_tracing, shutdown_tracing, TracingOptions,
};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (enable_otel, json_logs) = match &cli.command {
        Commands::Serve { otel, log_json, .. } => (*otel, *log_json),
        _ => (false, false),
    };
    init_tracing(&TracingOptions {
        default_filter: filter_for_verbosity(cli.verbose, cli.quiet).to_string(),
        json: json_logs,
        enable_otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let state = AppState::init().await?;

    let outcome = match cli.command {
        Commands::Serve { host, port, .. } => cli::serve::serve(state, host, port).await,
        Commands::Snapshot => cli::snapshot::show_snapshot(&state, cli.json).await,
        Commands::Config => cli::config::show_config(&state, cli.json),
    };

    shutdown_tracing();
    outcome
}
