// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `expflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "expflow",
    version,
    about = "Run a parameter-sweep experiment on HPC platforms.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the experiment config file (TOML).
    ///
    /// Default: `Expflow.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Expflow.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `EXPFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the job graph, but don't submit anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Keep every generated dependency edge (skip transitive reduction).
    #[arg(long)]
    pub notransitive: bool,

    /// Seconds to wait for the experiment lock before giving up.
    #[arg(long, value_name = "SECS", default_value_t = 1)]
    pub lock_timeout: u64,
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
