//! Article resolution: one fetched page in, one per-page outcome out.
//!
//! Extraction, date resolution and the admission gate are synchronous and touch
//! only the page and the read-only tables. Only the final store write is awaited, so
//! a parsed document never has to live across an `.await` in the crawl driver.

use crate::admission::should_save;
use crate::config::{PipelineConfig, Tables};
use crate::dates::resolve_date;
use crate::extract::extract_field;
use crate::models::{Admission, Article, PageView, Resolution};
use crate::selectors::Field;
use crate::store::{SaveOutcome, Store};
use crate::utils::truncate_for_log;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Turns pages into stored articles. Cheap to clone; clones share tables and store.
#[derive(Debug, Clone)]
pub struct Resolver {
    tables: Arc<Tables>,
    config: Arc<PipelineConfig>,
    store: Store,
}

impl Resolver {
    pub fn new(tables: Arc<Tables>, config: Arc<PipelineConfig>, store: Store) -> Self {
        Self {
            tables,
            config,
            store,
        }
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[cfg(test)]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Build the article record for a page without gating or persisting it.
    pub fn resolve(&self, page: &PageView, outlet: &str) -> Article {
        self.resolve_at(page, outlet, Utc::now().date_naive())
    }

    /// [`Resolver::resolve`] with an explicit "today", the upper bound for dates.
    pub fn resolve_at(&self, page: &PageView, outlet: &str, today: NaiveDate) -> Article {
        let selectors = &self.tables.selectors;
        let doc = &page.document;
        let enc = page.declared_encoding.as_str();
        let field = |f: Field| extract_field(doc, selectors, f, enc);

        Article {
            url: page.url.to_string(),
            outlet: outlet.to_string(),
            title: field(Field::Title),
            description: field(Field::Description),
            date_published: resolve_date(doc, &page.url, selectors, enc, today),
            author: field(Field::Author),
            keywords: field(Field::Keywords),
            text: field(Field::Text),
            editor: field(Field::Editor),
            date_scraped: page.snapshot_date.unwrap_or(today),
        }
    }

    /// Resolve a page and run the admission gate on the result.
    #[instrument(level = "debug", skip_all, fields(url = %page.url, outlet = %outlet))]
    pub fn assess(&self, page: &PageView, outlet: &str) -> (Article, Admission) {
        let article = self.resolve(page, outlet);
        let admission = should_save(
            &article,
            &page.url,
            page.declared_lang.as_deref(),
            &self.config,
        );
        (article, admission)
    }

    /// Persist an assessed article if it was admitted.
    #[instrument(level = "info", skip_all, fields(url = %article.url))]
    pub async fn persist(&self, article: Article, admission: Admission) -> Resolution {
        if let Admission::Rejected(reason) = admission {
            debug!(%reason, "Rejected article");
            return Resolution::Rejected(reason);
        }
        match self.store.save(&article).await {
            Ok(SaveOutcome::Persisted) => {
                info!(
                    outlet = %article.outlet,
                    title = %truncate_for_log(article.title.as_deref().unwrap_or(""), 80),
                    date_published = ?article.date_published,
                    "Article saved"
                );
                Resolution::Persisted
            }
            Ok(SaveOutcome::SkippedDuplicate) => {
                info!("Skipping duplicate article");
                Resolution::Skipped
            }
            Err(e) => {
                error!(error = %e, "Error occurred while saving article");
                Resolution::Failed(e.to_string())
            }
        }
    }

    /// Extract, date, gate and persist one page.
    pub async fn resolve_and_maybe_save(&self, page: &PageView, outlet: &str) -> Resolution {
        let (article, admission) = self.assess(page, outlet);
        self.persist(article, admission).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_selector_table, DomainTable};
    use crate::models::RejectReason;
    use crate::store::PoolSettings;
    use std::time::Duration;
    use url::Url;

    const SELECTORS: &str = r#"{"SELECTORS": {
        "title": ["h1.headline", "//meta[@property='og:title']/@content"],
        "description": ["meta[name='description']::attr(content)"],
        "date": ["time.published", "//span[contains(text(), 'published')]"],
        "author": [".byline a"],
        "keywords": ["meta[name='keywords']::attr(content)"],
        "text": [".story-body-empty", "div.story-body p"],
        "editor": ["//p[starts-with(text(), 'Edited by')]"]
    }}"#;

    const PARAGRAPH: &str = "The city council voted on Tuesday to reopen the harbour after \
        months of repairs, a decision that local businesses said would bring back the \
        summer visitors they have been missing since the storm damaged the old pier.";

    fn page_html(lang: &str, date: &str, paragraphs: usize) -> String {
        format!(
            r#"<html {lang}><head>
                <meta property="og:title" content="Harbour Reopens After Repairs">
                <meta name="description" content="Council votes to reopen the harbour.">
                <meta name="keywords" content="harbour, council">
            </head><body>
                <div class="byline">By <a href="/staff/jr">Jane Roe</a></div>
                <time class="published">{date}</time>
                <div class="story-body-empty">   </div>
                <div class="story-body">{}</div>
                <p>Edited by Sam Lee</p>
            </body></html>"#,
            format!("<p>{PARAGRAPH}</p>").repeat(paragraphs)
        )
    }

    fn view(url: &str, html: &str, snapshot: Option<NaiveDate>) -> PageView {
        PageView::parse(Url::parse(url).unwrap(), html, "utf-8", snapshot)
    }

    async fn resolver(dir: &tempfile::TempDir) -> Resolver {
        let tables = Tables {
            selectors: parse_selector_table(SELECTORS).unwrap(),
            domains: DomainTable::new([("example.com".to_string(), "Example News".to_string())]),
        };
        let url = format!("sqlite://{}", dir.path().join("articles.db").display());
        let store = Store::connect(
            &url,
            PoolSettings {
                max_connections: 2,
                acquire_timeout: Duration::from_secs(10),
            },
        )
        .await
        .unwrap();
        Resolver::new(Arc::new(tables), Arc::new(PipelineConfig::default()), store)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_fills_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(&dir).await;
        let page = view(
            "https://www.example.com/2019/05/10/harbour",
            &page_html(r#"lang="en""#, "March 3, 2021", 3),
            None,
        );
        let a = r.resolve_at(&page, "Example News", today());

        assert_eq!(a.url, "https://www.example.com/2019/05/10/harbour");
        assert_eq!(a.outlet, "Example News");
        assert_eq!(a.title.as_deref(), Some("Harbour Reopens After Repairs"));
        assert_eq!(a.description.as_deref(), Some("Council votes to reopen the harbour."));
        assert_eq!(a.author.as_deref(), Some("Jane Roe"));
        assert_eq!(a.keywords.as_deref(), Some("harbour, council"));
        assert_eq!(a.editor.as_deref(), Some("Edited by Sam Lee"));
        assert_eq!(a.date_published, NaiveDate::from_ymd_opt(2021, 3, 3));
        assert_eq!(a.date_scraped, today());
        assert!(a.text.as_deref().unwrap().starts_with("The city council voted"));
    }

    #[tokio::test]
    async fn test_snapshot_date_becomes_date_scraped() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(&dir).await;
        let snapshot = NaiveDate::from_ymd_opt(2015, 8, 20);
        let page = view(
            "https://example.com/archive/2015-08-19/story",
            &page_html("", "", 3),
            snapshot,
        );
        let a = r.resolve_at(&page, "Example News", today());
        assert_eq!(a.date_scraped, snapshot.unwrap());
        assert_eq!(a.date_published, NaiveDate::from_ymd_opt(2015, 8, 19));
    }

    #[tokio::test]
    async fn test_accepted_page_persisted_once() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(&dir).await;
        let page = view(
            "https://example.com/2021/03/03/harbour",
            &page_html(r#"lang="en-GB""#, "March 3, 2021", 3),
            None,
        );
        assert_eq!(r.resolve_and_maybe_save(&page, "Example News").await, Resolution::Persisted);
        assert_eq!(r.resolve_and_maybe_save(&page, "Example News").await, Resolution::Skipped);
        assert_eq!(r.store().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_short_page_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(&dir).await;
        let page = view(
            "https://example.com/2021/03/03/brief",
            &page_html(r#"lang="en""#, "March 3, 2021", 1),
            None,
        );
        assert!(matches!(
            r.resolve_and_maybe_save(&page, "Example News").await,
            Resolution::Rejected(RejectReason::TextTooShort { .. })
        ));
        assert_eq!(r.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_boilerplate_page_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(&dir).await;
        let page = view(
            "https://example.com/privacy-policy/",
            &page_html(r#"lang="en""#, "", 10),
            None,
        );
        assert_eq!(
            r.resolve_and_maybe_save(&page, "Example News").await,
            Resolution::Rejected(RejectReason::BoilerplatePath("privacy-policy".into()))
        );
    }

    #[tokio::test]
    async fn test_undeclared_language_detected() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(&dir).await;
        let page = view("https://example.com/news/harbour", &page_html("", "", 3), None);
        assert_eq!(r.resolve_and_maybe_save(&page, "Example News").await, Resolution::Persisted);
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(&dir).await;
        r.store().close().await;
        let page = view(
            "https://example.com/2021/03/03/harbour",
            &page_html(r#"lang="en""#, "", 3),
            None,
        );
        assert!(matches!(
            r.resolve_and_maybe_save(&page, "Example News").await,
            Resolution::Failed(_)
        ));
    }

    /// Shared buffer the fmt subscriber writes into.
    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_assess_span_records_outlet() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(&dir).await;
        // No markup date, so the URL date is used and logged inside the span.
        let page = view(
            "https://example.com/2021/03/03/harbour",
            &page_html(r#"lang="en""#, "", 3),
            None,
        );

        let logs = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || r.assess(&page, "Example News"));

        let out = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("Using date embedded in URL"), "{out}");
        assert!(out.contains("outlet=Example News"), "{out}");
    }
}
