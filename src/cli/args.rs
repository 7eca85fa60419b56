//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::config::WatcherBackend;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Watch view directories and invalidate the lookup cache on change
#[derive(Parser, Debug)]
#[command(
    name = "viewreload",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch view directories and invalidate the lookup cache on change",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Default log level (error, warn, info, debug, trace); RUST_LOG wins
    #[arg(long, global = true, env = "VIEWRELOAD_LOG")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Set up .viewreload/settings.toml in the current directory
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    Config,

    /// Poll view directories and clear the cache when they change
    Watch {
        /// Directories to watch, in addition to `view_paths` from settings
        dirs: Vec<PathBuf>,

        /// Poll interval in milliseconds (overrides config)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Watcher backend (overrides config)
        #[arg(long, value_enum)]
        backend: Option<WatcherBackend>,

        /// Check once and exit
        #[arg(long)]
        once: bool,
    },
}
