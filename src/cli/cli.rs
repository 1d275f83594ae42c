use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::application::data::{LogLevel, OutputFormat};
use crate::config::SETTINGS_FILE_NAME;

/// Captures directory snapshots and measures how a reorganization changed them
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[clap(long, short, default_value = "warn", value_enum, global = true)]
    pub log_level: LogLevel,

    /// Settings file; defaults are used when it does not exist
    #[clap(long, short, default_value = SETTINGS_FILE_NAME, global = true)]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Capture a hashed snapshot of a directory
    Snapshot {
        /// Directory to capture
        root: PathBuf,

        /// Where to save the snapshot; `.json` files get JSON, anything else
        /// the compressed binary form. Prints JSON to stdout when omitted
        #[clap(long, short)]
        output: Option<PathBuf>,
    },
    /// Compare two snapshots, each given as a directory or a saved snapshot
    Evaluate {
        before: PathBuf,
        after: PathBuf,

        #[clap(long, short, default_value = "text", value_enum)]
        format: OutputFormat,

        /// Write the report to a file instead of stdout
        #[clap(long, short)]
        output: Option<PathBuf>,
    },
}
