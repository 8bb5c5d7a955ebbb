//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use report_crawler::Category;

/// Crawl research-report listings and download their PDF artifacts.
#[derive(Parser, Debug)]
#[command(name = "report-crawler")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/report-crawler/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Root directory for downloaded artifacts
    #[arg(short = 'o', long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// SQLite file holding the artifact cache
    #[arg(long, global = true)]
    pub cache_db: Option<PathBuf>,

    /// Concurrent download workers (1-32)
    #[arg(short = 'w', long, global = true, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub workers: Option<u8>,

    /// Save fetched list pages here for inspection
    #[arg(long, global = true)]
    pub debug_dir: Option<PathBuf>,

    /// Chromium executable to drive
    #[arg(long, global = true)]
    pub chromium: Option<PathBuf>,

    /// Show the browser window
    #[arg(long, global = true)]
    pub headed: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl one or more categories and download their artifacts
    Crawl(CrawlArgs),

    /// Download a single artifact URL
    Fetch(FetchArgs),

    /// Inspect or clear the artifact cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(ClapArgs, Debug)]
pub struct CrawlArgs {
    /// `all` or a comma-separated list: strategy,macro,industry,stock
    #[arg(short = 't', long = "type", default_value = "all")]
    pub types: String,

    /// Reports per category (1-50)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=50))]
    pub limit: Option<u8>,

    /// Ignore cached results
    #[arg(short, long)]
    pub force: bool,

    /// Resolve artifact URLs without downloading them
    #[arg(long)]
    pub no_download: bool,
}

#[derive(ClapArgs, Debug)]
pub struct FetchArgs {
    /// Absolute http(s) URL of the artifact
    pub url: String,

    /// Page the artifact is linked from
    #[arg(long)]
    pub referer: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// List cache entries
    Status,

    /// Delete cache entries; with no filter, everything
    Clear {
        #[arg(short = 't', long = "type")]
        category: Option<Category>,

        #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=50))]
        limit: Option<u8>,
    },
}
