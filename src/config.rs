//! Configuration: pipeline tunables, the selector table and the domain table.
//!
//! All three are loaded once at startup and never change afterwards; workers share
//! them read-only behind an `Arc`.
//!
//! # Files
//!
//! - **Pipeline config** (YAML, optional): every key has a default
//! - **Selector table** (JSON): `{"SELECTORS": {"title": ["h1", "//meta[@property='og:title']/@content"]}}`,
//!   the `SELECTORS` wrapper is optional
//! - **Domain table** (JSON): `{"example.com": "Example News"}`

use crate::frontier::registrable_domain;
use crate::selectors::{Field, SelectorTable, SelectorTableError};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Selectors(#[from] SelectorTableError),
    #[error("domain table {0} has no entries")]
    EmptyDomains(PathBuf),
    #[error("invalid setting `{key}`: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Tunables of the resolution pipeline and the crawl driver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// ISO 639-1 code pages must be written in.
    pub target_language: String,
    /// Minimum normalized text length, in characters, for an article to be kept.
    pub min_text_chars: usize,
    /// URL path fragments that mark non-article pages.
    pub boilerplate_markers: Vec<String>,
    /// Pages resolved concurrently.
    pub workers: usize,
    /// Maximum pooled database connections.
    pub pool_size: u32,
    /// How long to wait for a pooled connection.
    pub acquire_timeout_secs: u64,
    /// Minimum gap between consecutive requests of the crawl driver, across all workers.
    pub download_delay_ms: u64,
    /// Link hops followed from each seed homepage.
    pub max_depth: usize,
    /// Upper bound on pages fetched per seed.
    pub max_pages_per_seed: usize,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_language: "en".to_string(),
            min_text_chars: 300,
            boilerplate_markers: ["sponsored-content", "about-us", "privacy-policy", "terms-of-use"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            workers: 4,
            pool_size: 10,
            acquire_timeout_secs: 30,
            download_delay_ms: 2000,
            max_depth: 1,
            max_pages_per_seed: 500,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                (KHTML, like Gecko) Chrome/88.0.4324.150 Safari/537.36"
                .to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl PipelineConfig {
    /// Load from a YAML file, or use defaults when no path is given.
    #[instrument(level = "info")]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let raw = read(path)?;
                Self::from_yaml(&raw).map_err(|source| ConfigError::Yaml {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_language.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "target_language",
                message: "must not be empty".into(),
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid {
                key: "workers",
                message: "must be at least 1".into(),
            });
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid {
                key: "pool_size",
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn download_delay(&self) -> Duration {
        Duration::from_millis(self.download_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SelectorFile {
    Wrapped {
        #[serde(rename = "SELECTORS")]
        selectors: HashMap<Field, Vec<String>>,
    },
    Bare(HashMap<Field, Vec<String>>),
}

/// Compile a selector table from JSON text.
pub fn parse_selector_table(raw: &str) -> Result<SelectorTable, SelectorTableLoadError> {
    let file: SelectorFile = serde_json::from_str(raw)?;
    let map = match file {
        SelectorFile::Wrapped { selectors } | SelectorFile::Bare(selectors) => selectors,
    };
    Ok(SelectorTable::compile(map)?)
}

#[derive(Debug, Error)]
pub enum SelectorTableLoadError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Compile(#[from] SelectorTableError),
}

/// Load and compile the selector table file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub fn load_selector_table(path: &Path) -> Result<SelectorTable, ConfigError> {
    let raw = read(path)?;
    let table = parse_selector_table(&raw).map_err(|e| match e {
        SelectorTableLoadError::Json(source) => ConfigError::Json {
            path: path.to_path_buf(),
            source,
        },
        SelectorTableLoadError::Compile(e) => ConfigError::Selectors(e),
    })?;
    info!(fields = table.configured_fields().count(), "Loaded selector table");
    Ok(table)
}

/// Hostname → outlet label. Also the list of crawl seeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainTable {
    outlets: BTreeMap<String, String>,
}

impl DomainTable {
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            outlets: entries
                .into_iter()
                .map(|(host, outlet)| (normalize_host(&host), outlet))
                .filter(|(host, _)| !host.is_empty())
                .collect(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let map: BTreeMap<String, String> = serde_json::from_str(raw)?;
        Ok(Self::new(map))
    }

    /// `(host, outlet)` pairs in host order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outlets.iter().map(|(h, o)| (h.as_str(), o.as_str()))
    }

    pub fn len(&self) -> usize {
        self.outlets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outlets.is_empty()
    }

    /// Outlet for a page URL: exact host, then host without `www.`, then any entry
    /// sharing the page's registrable domain.
    pub fn outlet_for(&self, url: &Url) -> Option<&str> {
        let host = normalize_host(url.host_str()?);
        if let Some(outlet) = self.outlets.get(&host) {
            return Some(outlet);
        }
        if let Some(outlet) = host.strip_prefix("www.").and_then(|h| self.outlets.get(h)) {
            return Some(outlet);
        }
        let domain = registrable_domain(url)?;
        self.outlets
            .iter()
            .find(|(h, _)| {
                Url::parse(&format!("http://{h}"))
                    .ok()
                    .and_then(|u| registrable_domain(&u))
                    .is_some_and(|d| d == domain)
            })
            .map(|(_, o)| o.as_str())
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Load the domain table file; an empty table is an error.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub fn load_domain_table(path: &Path) -> Result<DomainTable, ConfigError> {
    let raw = read(path)?;
    let table = DomainTable::from_json(&raw).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    if table.is_empty() {
        return Err(ConfigError::EmptyDomains(path.to_path_buf()));
    }
    info!(domains = table.len(), "Loaded domain table");
    Ok(table)
}

/// The read-only tables every worker consults.
#[derive(Debug, Clone)]
pub struct Tables {
    pub selectors: SelectorTable,
    pub domains: DomainTable,
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
