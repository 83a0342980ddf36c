//! # news_harvest
//!
//! A news article harvester that turns HTML pages from a fixed set of news outlets
//! into deduplicated, quality-filtered article records stored in SQLite.
//!
//! ## Features
//!
//! - Field extraction driven by a JSON selector table of CSS and path queries with
//!   ordered fallbacks
//! - Text normalization: mis-decoded text repair, ASCII transliteration, whitespace
//!   collapse and removal of bare URL lines
//! - Publish date resolution from page markup, falling back to dates embedded in the
//!   URL path, bounded to 1990..=today
//! - Admission gate on text length, boilerplate URL paths and page language
//! - At-most-once persistence per URL, also under concurrent workers
//! - A breadth-first seed crawl over the domain table, and single-page ingest of
//!   archived HTML
//!
//! ## Usage
//!
//! ```sh
//! news_harvest --selectors selectors.json --domains domains.json crawl --workers 8
//! news_harvest ingest --url https://example.com/2021/03/03/story --file story.html
//! ```
//!
//! ## Architecture
//!
//! Per page:
//! 1. **Extraction**: every field takes the first selector that yields normalized text
//! 2. **Dating**: markup date, then URL date, both inside the plausibility window
//! 3. **Admission**: length, path and language checks
//! 4. **Persistence**: a single conditional insert keyed by URL

use clap::Parser;
use encoding_rs::{Encoding, UTF_8};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};
use url::Url;

mod admission;
mod cli;
mod config;
mod crawl;
mod dates;
mod extract;
mod frontier;
mod language;
mod models;
mod normalize;
mod path_query;
mod pipeline;
mod selectors;
mod store;
mod utils;

use cli::{Cli, Command};
use config::{load_domain_table, load_selector_table, PipelineConfig, Tables};
use crawl::{CrawlSettings, Crawler};
use models::{PageView, Resolution};
use pipeline::Resolver;
use store::{PoolSettings, Store};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("news_harvest starting up");

    let args = Cli::parse();
    debug!(?args.config, ?args.selectors, ?args.domains, "Parsed CLI arguments");

    // ---- Load config & tables ----
    let config = PipelineConfig::load(args.config.as_deref())?;
    let tables = Tables {
        selectors: load_selector_table(&args.selectors)?,
        domains: load_domain_table(&args.domains)?,
    };

    let dry_run = matches!(args.command, Command::Ingest { dry_run: true, .. });
    let (database_url, pool) = if dry_run {
        // Nothing is written; keep the real database untouched.
        (
            "sqlite::memory:",
            PoolSettings {
                max_connections: 1,
                acquire_timeout: config.acquire_timeout(),
            },
        )
    } else {
        (
            args.database_url.as_str(),
            PoolSettings {
                max_connections: config.pool_size,
                acquire_timeout: config.acquire_timeout(),
            },
        )
    };
    let store = Store::connect(database_url, pool).await?;
    let resolver = Resolver::new(Arc::new(tables), Arc::new(config), store.clone());

    match args.command {
        Command::Crawl {
            workers,
            max_depth,
            max_pages,
        } => {
            let mut settings = CrawlSettings::from_config(resolver.config());
            if let Some(workers) = workers {
                settings.workers = workers.max(1);
            }
            if let Some(max_depth) = max_depth {
                settings.max_depth = max_depth;
            }
            if let Some(max_pages) = max_pages {
                settings.max_pages_per_seed = max_pages;
            }
            let client = settings.client()?;
            let stats = Crawler::new(resolver, client, settings).run().await;
            info!(
                fetched = stats.fetched,
                fetch_failures = stats.fetch_failures,
                persisted = stats.persisted,
                skipped = stats.skipped,
                rejected = stats.rejected,
                failed = stats.failed,
                stored_total = store.count().await?,
                "Crawl complete"
            );
        }
        Command::Ingest {
            url,
            file,
            outlet,
            encoding,
            snapshot_date,
            dry_run,
        } => {
            let url = Url::parse(&url)?;
            let outlet = match outlet {
                Some(outlet) => outlet,
                None => resolver
                    .tables()
                    .domains
                    .outlet_for(&url)
                    .map(str::to_string)
                    .ok_or_else(|| format!("no outlet configured for {url}; pass --outlet"))?,
            };
            let html = read_page(&file, &encoding).await?;
            let page = PageView::parse(url, &html, &encoding, snapshot_date);

            if dry_run {
                let (article, admission) = resolver.assess(&page, &outlet);
                info!(
                    url = %page.url,
                    accepted = admission.is_accepted(),
                    ?admission,
                    "Dry run; nothing saved"
                );
                println!("{}", serde_json::to_string_pretty(&article)?);
            } else {
                match resolver.resolve_and_maybe_save(&page, &outlet).await {
                    Resolution::Persisted => info!(url = %page.url, "Ingested article"),
                    Resolution::Skipped => info!(url = %page.url, "Article already stored"),
                    Resolution::Rejected(reason) => {
                        info!(url = %page.url, %reason, "Article not admitted")
                    }
                    Resolution::Failed(e) => warn!(url = %page.url, error = %e, "Ingest failed"),
                }
            }
        }
    }

    store.close().await;

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}

/// Read an HTML file and decode it with the encoding it was served with.
#[instrument(level = "info", skip_all, fields(path = %path.display(), %encoding))]
async fn read_page(path: &Path, encoding: &str) -> Result<String, Box<dyn Error>> {
    let bytes = tokio::fs::read(path).await?;
    let encoding = Encoding::for_label(encoding.trim().as_bytes()).unwrap_or_else(|| {
        warn!("Unknown encoding label; decoding as UTF-8");
        UTF_8
    });
    let (html, _, had_errors) = encoding.decode(&bytes);
    if had_errors {
        warn!("Page contained byte sequences invalid for its encoding");
    }
    Ok(html.into_owned())
}
