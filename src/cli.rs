// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::types::Channel;

/// Command-line arguments for `anonctl`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "anonctl",
    version,
    about = "Run and supervise reversible video anonymization jobs.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// A missing file is not an error; built-in defaults are used instead.
    #[arg(long, value_name = "PATH", default_value = "Anonctl.toml", global = true)]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ANONCTL_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    /// Load and validate the config, print it, but don't start anything.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a single job and stream its events to stdout as JSON lines.
    Run {
        /// Channel to start the job on.
        #[arg(long, value_name = "CHANNEL")]
        channel: Channel,

        /// Job payload as an inline JSON object.
        #[arg(long, value_name = "JSON", conflicts_with = "payload_file")]
        payload: Option<String>,

        /// Read the job payload from a JSON file.
        #[arg(long, value_name = "PATH")]
        payload_file: Option<PathBuf>,
    },

    /// Bridge start/cancel requests from stdin to the control plane.
    ///
    /// Each input line is `{"op":"start","channel":..,"payload":{..}}` or
    /// `{"op":"cancel","channel":..,"jobId":..}`. Replies and job events are
    /// written to stdout, one JSON object per line. EOF shuts down.
    Serve,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
