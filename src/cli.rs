// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::types::ScaleMode;

/// Command-line arguments for `fleex`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "fleex",
    version,
    about = "Fan tasks out across a fleet of remote machines and fan the results back in.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the operator config file (TOML).
    ///
    /// Default: `Fleex.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLEEX_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a multi-step workflow file across a fleet.
    Workflow(WorkflowArgs),
    /// Run one command across a fleet, splitting the input.
    Scan(ScanArgs),
    /// Run a build recipe on every machine of a fleet.
    Build(BuildArgs),
}

/// Flags shared by `workflow` and `scan`.
#[derive(Debug, Clone, Args)]
pub struct FanOutArgs {
    /// Fleet name (label prefix).
    #[arg(long, short = 'f', value_name = "NAME")]
    pub fleet: String,

    /// Line-oriented input file to distribute.
    #[arg(long, short = 'i', value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Where the aggregated output is written.
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: PathBuf,

    /// Variable override, repeatable.
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub vars: Vec<(String, String)>,

    /// Keep the local run directory after the run.
    #[arg(long)]
    pub keep_temp: bool,

    /// Delete the fleet when the run ends (or on Ctrl-C).
    #[arg(long)]
    pub delete_after: bool,

    /// Expand every command for every machine, but make no remote calls.
    #[arg(long)]
    pub dry_run: bool,

    /// Print per-step detail in the report.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

#[derive(Debug, Clone, Args)]
pub struct WorkflowArgs {
    /// Workflow file (YAML or TOML).
    #[arg(long, value_name = "FILE")]
    pub file: PathBuf,

    /// Scale mode of the first step when it declares none.
    #[arg(long, value_name = "MODE", default_value = "horizontal")]
    pub scale_mode: ScaleMode,

    #[command(flatten)]
    pub common: FanOutArgs,
}

#[derive(Debug, Clone, Args)]
pub struct ScanArgs {
    /// Command template, e.g. `nmap -iL {INPUT} -oG {OUTPUT}`.
    #[arg(long, short = 'c', value_name = "CMD")]
    pub command: String,

    #[command(flatten)]
    pub common: FanOutArgs,
}

#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
    #[arg(long, short = 'f', value_name = "NAME")]
    pub fleet: String,

    /// Build recipe (YAML or TOML).
    #[arg(long, value_name = "FILE")]
    pub recipe: PathBuf,

    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub vars: Vec<(String, String)>,

    /// Machines built at once (default 5).
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Keep going past failed steps.
    #[arg(long)]
    pub continue_on_error: bool,

    /// Skip the recipe's verification checks.
    #[arg(long)]
    pub no_verify: bool,

    #[arg(long)]
    pub delete_after: bool,

    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, short = 'v')]
    pub verbose: bool,
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

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
