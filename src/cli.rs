//! Command-line interface definitions for news_harvest.
//!
//! Paths and the database URL can be given as flags or environment variables;
//! pipeline tunables live in the optional YAML config file.

use crate::utils::parse_day;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for news_harvest.
///
/// # Examples
///
/// ```sh
/// # Crawl every outlet in domains.json
/// news_harvest --selectors selectors.json --domains domains.json crawl
///
/// # Resolve one archived page and print the record without saving it
/// news_harvest ingest --url https://example.com/2021/03/03/story --file story.html --dry-run
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to the pipeline config (YAML)
    #[arg(short, long, env = "NEWS_HARVEST_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Selector table (JSON)
    #[arg(
        long,
        env = "NEWS_HARVEST_SELECTORS",
        default_value = "selectors.json",
        global = true
    )]
    pub selectors: PathBuf,

    /// Domain table mapping hosts to outlet names (JSON)
    #[arg(
        long,
        env = "NEWS_HARVEST_DOMAINS",
        default_value = "domains.json",
        global = true
    )]
    pub domains: PathBuf,

    /// SQLite database the articles are stored in
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite://articles.db",
        global = true
    )]
    pub database_url: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl every domain table entry from its homepage
    Crawl {
        /// Pages fetched and resolved concurrently
        #[arg(short, long)]
        workers: Option<usize>,

        /// Link hops followed from each homepage
        #[arg(long)]
        max_depth: Option<usize>,

        /// Upper bound on pages fetched per outlet
        #[arg(long)]
        max_pages: Option<usize>,
    },
    /// Resolve one locally stored HTML page
    Ingest {
        /// URL the page was fetched from
        #[arg(short, long)]
        url: String,

        /// File holding the page's HTML
        #[arg(short, long)]
        file: PathBuf,

        /// Outlet name; looked up in the domain table when omitted
        #[arg(short, long)]
        outlet: Option<String>,

        /// Character encoding the page was served with
        #[arg(short, long, default_value = "utf-8")]
        encoding: String,

        /// Capture date of an archived snapshot (YYYY-MM-DD)
        #[arg(long, value_parser = parse_day)]
        snapshot_date: Option<NaiveDate>,

        /// Print the resolved record as JSON instead of saving it
        #[arg(long)]
        dry_run: bool,
    },
}
