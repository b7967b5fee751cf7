//! Command-line interface definitions for the engine binary.

use clap::{Parser, Subcommand};

/// Top-level command-line interface definition.
#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the discovery and liveness engine, logging device state changes.
    Monitor(MonitorArgs),
}

/// Arguments for the monitor command.
#[derive(Debug, Parser)]
pub struct MonitorArgs {
    /// Path to the configuration file. Missing file means built-in defaults.
    #[arg(short, long, default_value = "broodlink.toml")]
    pub config: String,
}
