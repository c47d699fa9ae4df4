use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::cache::Resource;

/// Command-line arguments for the tiercache binary.
#[derive(Debug, Parser)]
#[command(name = "tiercache", version, about = "Tiered analytics cache")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TIERCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open the cache and run maintenance until interrupted.
    Run,
    /// Print cache statistics as JSON.
    Stats,
    /// Sweep expired entries once.
    Cleanup,
    /// Drop every durable entry.
    Clear,
    /// Drop every entry of one resource.
    Invalidate(InvalidateArgs),
}

#[derive(Debug, Args, Clone, PartialEq, Eq)]
pub struct InvalidateArgs {
    /// Resource name, e.g. `kpis` or `model_usage`.
    #[arg(value_name = "RESOURCE")]
    pub resource: Resource,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the durable tier database file.
    #[arg(
        long = "durable-path",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub durable_path: Option<PathBuf>,
}
