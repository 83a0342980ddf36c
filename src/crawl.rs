//! Seed crawl over the domain table.
//!
//! Every domain table entry is crawled breadth-first from `http://{host}`. The seed
//! page is only mined for links; pages at depth one and deeper are resolved as article
//! candidates and, while depth remains, mined for further links too. Links leave the
//! frontier through [`should_follow`](crate::frontier::should_follow), each URL is
//! fetched at most once per seed, and consecutive requests are spaced by a fixed
//! politeness delay. Every article found from a seed carries that seed's outlet.
//!
//! Pages of one depth level are fetched concurrently, up to `workers` at a time; the
//! delay is shared by all workers, so request starts stay at least one delay apart.

use crate::config::PipelineConfig;
use crate::frontier::discover_links;
use crate::models::{Admission, Article, PageView, Resolution};
use crate::pipeline::Resolver;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::collections::HashSet;
use std::error::Error;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

static CHARSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)charset\s*=\s*"?([A-Za-z0-9_\-.:]+)"?"#).unwrap());

/// Knobs of the crawl driver, taken from [`PipelineConfig`] and optionally overridden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSettings {
    pub workers: usize,
    pub max_depth: usize,
    pub max_pages_per_seed: usize,
    pub download_delay: Duration,
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl CrawlSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            workers: config.workers,
            max_depth: config.max_depth,
            max_pages_per_seed: config.max_pages_per_seed,
            download_delay: config.download_delay(),
            user_agent: config.user_agent.clone(),
            request_timeout: config.request_timeout(),
        }
    }

    /// HTTP client carrying the configured user agent and timeout.
    pub fn client(&self) -> Result<Client, reqwest::Error> {
        Client::builder()
            .user_agent(self.user_agent.as_str())
            .timeout(self.request_timeout)
            .build()
    }
}

/// Tally of a crawl run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub fetched: usize,
    pub fetch_failures: usize,
    pub persisted: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl CrawlStats {
    fn record(&mut self, resolution: &Resolution) {
        match resolution {
            Resolution::Persisted => self.persisted += 1,
            Resolution::Skipped => self.skipped += 1,
            Resolution::Rejected(_) => self.rejected += 1,
            Resolution::Failed(_) => self.failed += 1,
        }
    }

    fn merge(&mut self, other: CrawlStats) {
        self.fetched += other.fetched;
        self.fetch_failures += other.fetch_failures;
        self.persisted += other.persisted;
        self.skipped += other.skipped;
        self.rejected += other.rejected;
        self.failed += other.failed;
    }
}

/// A downloaded page body with the charset its response declared.
#[derive(Debug)]
struct FetchedPage {
    url: Url,
    body: String,
    encoding: String,
}

/// What one visited URL contributed: links for the next level and, for article
/// candidates, a resolution.
#[derive(Debug, Default)]
struct Visit {
    fetched: bool,
    links: Vec<Url>,
    resolution: Option<Resolution>,
}

/// Hands out request slots at least `delay` apart, across all workers.
#[derive(Debug)]
struct Pacer {
    delay: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Pacer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait for this caller's slot.
    async fn wait(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(slot + self.delay);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

pub struct Crawler {
    resolver: Resolver,
    client: Client,
    pacer: Pacer,
    settings: CrawlSettings,
}

impl Crawler {
    pub fn new(resolver: Resolver, client: Client, settings: CrawlSettings) -> Self {
        Self {
            resolver,
            client,
            pacer: Pacer::new(settings.download_delay),
            settings,
        }
    }

    /// Crawl every domain table entry in turn and return the combined tally.
    #[instrument(level = "info", skip_all)]
    pub async fn run(&self) -> CrawlStats {
        let seeds: Vec<(String, String)> = self
            .resolver
            .tables()
            .domains
            .entries()
            .map(|(host, outlet)| (host.to_string(), outlet.to_string()))
            .collect();
        info!(seeds = seeds.len(), workers = self.settings.workers, "Starting crawl");

        let mut total = CrawlStats::default();
        for (host, outlet) in seeds {
            let Some(seed) = seed_url(&host) else {
                warn!(%host, "Domain table host is not a valid URL host; skipping");
                continue;
            };
            total.merge(self.crawl_seed(seed, &outlet).await);
        }
        total
    }

    #[instrument(level = "info", skip_all, fields(seed = %seed, outlet = %outlet))]
    async fn crawl_seed(&self, seed: Url, outlet: &str) -> CrawlStats {
        let mut stats = CrawlStats::default();
        let mut visited: HashSet<Url> = HashSet::from([seed.clone()]);
        let mut level = vec![seed];
        let mut budget = self.settings.max_pages_per_seed;

        for depth in 0..=self.settings.max_depth {
            if level.is_empty() || budget == 0 {
                break;
            }
            if level.len() > budget {
                debug!(depth, dropped = level.len() - budget, "Page budget reached");
                level.truncate(budget);
            }
            budget -= level.len();

            let visits: Vec<Visit> = stream::iter(level)
                .map(|url| self.visit(url, depth, outlet))
                .buffer_unordered(self.settings.workers.max(1))
                .collect()
                .await;

            let mut next = Vec::new();
            for visit in visits {
                if visit.fetched {
                    stats.fetched += 1;
                } else {
                    stats.fetch_failures += 1;
                }
                if let Some(resolution) = &visit.resolution {
                    stats.record(resolution);
                }
                next.extend(visit.links.into_iter().filter(|l| visited.insert(l.clone())));
            }
            debug!(depth, discovered = next.len(), "Finished depth level");
            level = next;
        }

        info!(
            fetched = stats.fetched,
            persisted = stats.persisted,
            skipped = stats.skipped,
            rejected = stats.rejected,
            failed = stats.failed,
            "Finished seed"
        );
        stats
    }

    async fn visit(&self, url: Url, depth: usize, outlet: &str) -> Visit {
        self.pacer.wait().await;
        let page = match self.fetch(&url).await {
            Ok(Some(page)) => page,
            Ok(None) => {
                debug!(%url, "Not an HTML page; ignoring");
                return Visit {
                    fetched: true,
                    ..Visit::default()
                };
            }
            Err(e) => {
                error!(error = %e, %url, "Fetch failed");
                return Visit::default();
            }
        };

        let (links, assessed) = inspect_page(
            &self.resolver,
            &page,
            outlet,
            depth >= 1,
            depth < self.settings.max_depth,
        );
        let resolution = match assessed {
            Some((article, admission)) => Some(self.resolver.persist(article, admission).await),
            None => None,
        };
        Visit {
            fetched: true,
            links,
            resolution,
        }
    }

    /// Download a page; `None` for responses that are not HTML.
    async fn fetch(&self, url: &Url) -> Result<Option<FetchedPage>, Box<dyn Error>> {
        let response = self.client.get(url.clone()).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !is_html(&content_type) {
            return Ok(None);
        }
        let final_url = response.url().clone();
        let encoding = charset(&content_type).unwrap_or_else(|| "utf-8".to_string());
        let body = response.text().await?;
        debug!(url = %final_url, bytes = body.len(), %encoding, "Fetched page");
        Ok(Some(FetchedPage {
            url: final_url,
            body,
            encoding,
        }))
    }
}

/// Parse a fetched page, collect its followable links and assess it as an article.
///
/// Runs synchronously so the parsed document is dropped before anything is awaited.
fn inspect_page(
    resolver: &Resolver,
    page: &FetchedPage,
    outlet: &str,
    is_candidate: bool,
    expand: bool,
) -> (Vec<Url>, Option<(Article, Admission)>) {
    let view = PageView::parse(page.url.clone(), &page.body, &page.encoding, None);
    let links = if expand {
        discover_links(&view.document, &view.url)
    } else {
        Vec::new()
    };
    let assessed = is_candidate.then(|| resolver.assess(&view, outlet));
    (links, assessed)
}

/// Start URL for a domain table host.
fn seed_url(host: &str) -> Option<Url> {
    Url::parse(&format!("http://{host}")).ok()
}

/// Whether a `Content-Type` denotes an HTML document. A missing type is treated as HTML.
fn is_html(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    mime.is_empty() || mime.eq_ignore_ascii_case("text/html") || mime.to_ascii_lowercase().contains("xhtml")
}

/// Charset label from a `Content-Type` header value.
fn charset(content_type: &str) -> Option<String> {
    CHARSET
        .captures(content_type)
        .map(|c| c[1].to_ascii_lowercase())
}
