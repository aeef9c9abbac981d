use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hlsforge")]
#[command(author, version, about = "Convert MP4 videos to HLS and migrate website pages to them")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Convert but do not upload or write pages
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert and upload sources without touching any page
    Convert {
        /// Local files or URLs of MP4 sources
        #[arg(required = true)]
        sources: Vec<String>,
    },

    /// Convert every configured source and rewrite the pages that use it
    ConvertAll {
        /// Only this site (host name)
        #[arg(long)]
        site: Option<String>,
    },

    /// Show configured sources and whether they are already HLS
    List {
        #[arg(long)]
        site: Option<String>,
    },

    /// Find every video URL used on a site's pages
    Scan {
        #[arg(long)]
        site: Option<String>,
    },

    /// List page backups, newest first
    Backups,

    /// Restore the pages saved in a backup
    Revert {
        /// Backup file name (inside the backup directory) or path
        #[arg(required = true)]
        file: String,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },
}
