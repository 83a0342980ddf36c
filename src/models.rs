//! Data models for fetched pages and the article records harvested from them.
//!
//! - [`PageView`]: one fetched page as handed over by the crawl layer
//! - [`Article`]: the unit of persistence, one row per distinct URL
//! - [`Admission`] / [`RejectReason`]: the verdict of the admission gate
//! - [`Resolution`]: the per-page outcome reported back to the caller

use chrono::NaiveDate;
use scraper::Html;
use serde::Serialize;
use std::fmt;
use url::Url;

/// A fetched page, parsed and annotated with what the server and markup declared.
#[derive(Debug)]
pub struct PageView {
    /// Final URL of the page.
    pub url: Url,
    /// The parsed document.
    pub document: Html,
    /// Character encoding declared by the response (e.g. `"utf-8"`).
    pub declared_encoding: String,
    /// Value of `<html lang>` or, failing that, `<html xml:lang>`.
    pub declared_lang: Option<String>,
    /// Capture date when the page was replayed from an archive.
    pub snapshot_date: Option<NaiveDate>,
}

impl PageView {
    /// Parse an HTML body into a page view, reading the declared document language.
    pub fn parse(
        url: Url,
        html: &str,
        declared_encoding: &str,
        snapshot_date: Option<NaiveDate>,
    ) -> Self {
        let document = Html::parse_document(html);
        let declared_lang = declared_language(&document);
        Self {
            url,
            document,
            declared_encoding: declared_encoding.to_string(),
            declared_lang,
            snapshot_date,
        }
    }
}

/// Read the document language from the root element, `lang` first, then `xml:lang`.
pub fn declared_language(document: &Html) -> Option<String> {
    let root = document.root_element();
    ["lang", "xml:lang"]
        .iter()
        .filter_map(|attr| root.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// A harvested news article.
///
/// `url` is the unique key. `date_scraped` is the archive capture date when the
/// page came from a snapshot, otherwise the day the page was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    pub url: String,
    pub outlet: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub date_published: Option<NaiveDate>,
    pub author: Option<String>,
    pub keywords: Option<String>,
    pub text: Option<String>,
    pub editor: Option<String>,
    pub date_scraped: NaiveDate,
}

/// Why the admission gate turned a candidate down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// No text was extracted.
    MissingText,
    /// Text shorter than the configured floor.
    TextTooShort { chars: usize, min: usize },
    /// The URL path contains a boilerplate marker such as `privacy-policy`.
    BoilerplatePath(String),
    /// The URL has no path beyond `/`.
    EmptyPath,
    /// The page is not in the target language.
    Language,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingText => write!(f, "no text extracted"),
            RejectReason::TextTooShort { chars, min } => {
                write!(f, "text too short ({chars} < {min} chars)")
            }
            RejectReason::BoilerplatePath(marker) => write!(f, "boilerplate path ({marker})"),
            RejectReason::EmptyPath => write!(f, "empty url path"),
            RejectReason::Language => write!(f, "not in target language"),
        }
    }
}

/// Verdict of the admission gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected(RejectReason),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted)
    }
}

/// Outcome of resolving one page end to end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A new row was written.
    Persisted,
    /// A row for this URL already existed.
    Skipped,
    /// The admission gate refused the page.
    Rejected(RejectReason),
    /// The store failed; the article was dropped.
    Failed(String),
}
