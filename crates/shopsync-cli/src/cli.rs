use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "shopsync")]
#[command(about = "Inspect and synchronize a shop's offline replica")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local replica database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the sync settings file (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Tenant (shop) to operate on; falls back to SHOPSYNC_TENANT
    #[arg(long, global = true, value_name = "ID")]
    pub tenant: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the sync checkpoint and pending counts per entity type
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List records waiting for upload
    Pending {
        /// Only show one entity type (e.g. `sale`, `product`)
        #[arg(long = "type", value_name = "TYPE")]
        entity_type: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List records that failed validation or await manual conflict resolution
    Issues {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one sync session now
    Sync {
        /// Output the session report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing on an interval until interrupted
    Watch {
        /// Seconds between sessions (defaults to the configured interval)
        #[arg(short, long, value_name = "SECS")]
        interval: Option<u64>,
    },
    /// Inspect sync settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print effective settings with secrets redacted
    Show,
}
