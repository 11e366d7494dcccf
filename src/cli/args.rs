//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// Grab - concurrent-safe dependency artifact cache
///
/// Resolves group:module:version coordinates to verified local files,
/// downloading each artifact at most once even when many processes ask at the same time.
#[derive(Parser, Debug)]
#[command(name = "grab")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "GRAB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cache root (overrides cache.root)
    #[arg(long, global = true, env = "GRAB_ROOT")]
    pub root: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve coordinates to local artifacts
    Resolve(ResolveArgs),

    /// Inspect and maintain the artifact cache
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Arguments for the resolve command
#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Coordinates as group:module:version[:classifier][@ext]
    #[arg(required = true)]
    pub coordinates: Vec<String>,

    /// Only use the cache, never download
    #[arg(long)]
    pub offline: bool,

    /// Accept artifacts without checking published checksums
    #[arg(long)]
    pub no_checksums: bool,

    /// Re-hash cached artifacts before using them
    #[arg(long)]
    pub verify: bool,

    /// Give up waiting for a coordinate's lock after N seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Maven-layout repository to fetch from (overrides repository.path)
    #[arg(long)]
    pub repository: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one path per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached artifacts
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,

        /// Only show artifacts cached more than N days ago
        #[arg(long, value_name = "DAYS")]
        older_than: Option<u32>,
    },

    /// Print the cache root
    Path,

    /// Re-hash every cached artifact against its recorded digest
    Verify {
        /// Remove artifacts that fail verification
        #[arg(long)]
        remove: bool,
    },

    /// Remove one cached artifact
    Remove {
        /// Coordinate as group:module:version[:classifier][@ext]
        coordinate: String,
    },

    /// Remove staging files left behind by crashed processes
    Clean {
        /// Only remove staging files older than N hours (default: from config)
        #[arg(long)]
        hours: Option<u32>,
    },

    /// Remove every cached artifact
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for the completions command
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,
}
