pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "freshet")]
#[command(about = "Fetch feeds concurrently and report what is new since the last run", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/freshet/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Number of parallel workers, overriding the config file
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch every enabled feed and print new items
    Run {
        /// Neither load nor save the cache; every item counts as new
        #[arg(long)]
        no_cache: bool,

        /// Load the cache but don't write it back
        #[arg(long)]
        no_update: bool,
    },
    /// List configured feeds
    Feeds,
    /// Show persisted cache entries
    Cache {
        /// Only show entries of this feed
        feed: Option<String>,
    },
}
