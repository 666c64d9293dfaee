//! Clap derive structures for the `linkmon` CLI.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use linkmon_core::Smoothing;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// linkmon -- link-utilization telemetry for software-defined networks
#[derive(Debug, Parser)]
#[command(
    name = "linkmon",
    version,
    about = "Collect link and per-endpoint utilization from switch counters",
    long_about = "Polls switch flow and port counters, derives link-wide and per-endpoint\n\
        utilization against a configurable bottleneck capacity, samples the\n\
        outbound queue of the monitored interface, and serves the figures over HTTP.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file layered over the platform default
    #[arg(long, short = 'c', env = "LINKMON_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the collector and its HTTP API
    Serve(ServeArgs),

    /// Read the outbound queue backlog once and exit
    #[command(alias = "queue")]
    SampleQueue(SampleQueueArgs),

    /// Inspect or create the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Serve ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// HTTP listen address (overrides [http].listen)
    #[arg(long, short = 'l')]
    pub listen: Option<SocketAddr>,

    /// Interface whose queue backlog is reported
    #[arg(long, short = 'i')]
    pub interface: Option<String>,

    /// Counter poll interval, e.g. 500ms or 1s
    #[arg(long, value_parser = humantime::parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Bottleneck capacity in bytes/second
    #[arg(long)]
    pub capacity: Option<u64>,

    /// Rx-byte smoothing on the link tap: raw or ewma
    #[arg(long, value_name = "MODE", value_parser = str::parse::<Smoothing>)]
    pub smoothing: Option<Smoothing>,

    /// Append diagnostics logs to this directory
    #[arg(long)]
    pub diagnostics_dir: Option<PathBuf>,

    /// Drive the collector from a built-in simulated two-switch fabric
    #[arg(long)]
    pub simulate: bool,

    /// Offered load per simulated endpoint in bytes/second (comma-separated)
    #[arg(long, value_delimiter = ',', default_value = "49000,98000,147000")]
    pub sim_rates: Vec<u64>,
}

// ── Sample queue ─────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SampleQueueArgs {
    /// Interface to inspect (overrides [monitor].interface)
    #[arg(long, short = 'i')]
    pub interface: Option<String>,

    /// Print a JSON object instead of the bare byte count
    #[arg(long)]
    pub json: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write an annotated default config file
    Init {
        /// Destination (defaults to the platform config path)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long, short = 'f')]
        force: bool,

        /// Write the resolved configuration (files and LINKMON_* overrides
        /// applied) instead of the annotated template
        #[arg(long)]
        resolved: bool,
    },

    /// Display the resolved configuration as TOML
    Show,

    /// Print the platform config file path
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
