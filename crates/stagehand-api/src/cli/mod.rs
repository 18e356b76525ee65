//! CLI command definitions for the `stagehand` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod config;
pub mod serve;
pub mod snapshot;

use clap::{Parser, Subcommand};

/// Run and inspect the Stagehand workflow server.
#[derive(Parser)]
#[command(name = "stagehand", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST/SSE API server.
    Serve {
        /// Port to listen on (defaults to `server.port` in config.toml).
        #[arg(short, long, env = "STAGEHAND_PORT")]
        port: Option<u16>,

        /// Host to bind to (defaults to `server.host` in config.toml).
        #[arg(long, env = "STAGEHAND_HOST")]
        host: Option<String>,

        /// Export tracing spans through OpenTelemetry (stdout exporter).
        #[arg(long)]
        otel: bool,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },

    /// Summarize the persisted workflow snapshot.
    Snapshot,

    /// Print the effective configuration as TOML.
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        <Cli as clap::CommandFactory>::command().debug_assert();
    }

    #[test]
    fn test_serve_flags_parse() {
        let cli = Cli::try_parse_from(["stagehand", "-vv", "serve", "--port", "8080", "--otel"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Serve { port, otel, log_json, .. } => {
                assert_eq!(port, Some(8080));
                assert!(otel);
                assert!(!log_json);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_global_json_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["stagehand", "snapshot", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Snapshot));
    }
}
