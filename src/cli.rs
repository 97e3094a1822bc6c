//! Command line interface built on clap.
//!
//! Defines [`Cli`] with the [`Command`] subcommands (serve, config) and the
//! global flags (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

/// Report pipeline: watches new orders, runs the analysis and publishes the reports.
#[derive(Debug, Parser)]
#[command(name = "reportflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file. Missing means defaults plus environment.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs the control surface.
    Serve {
        /// Start listening for orders right away.
        #[arg(long)]
        start: bool,
    },

    /// Prints the effective configuration with secrets redacted.
    Config,
}
