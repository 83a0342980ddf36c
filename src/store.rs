//! SQLite-backed article store with at-most-once persistence per URL.
//!
//! `url` is the table's primary key and every save is a single
//! `INSERT … ON CONFLICT(url) DO NOTHING`. The existence check and the insert are one
//! statement, so two workers racing on the same URL cannot both insert: the loser
//! sees zero affected rows and reports a duplicate. A failed insert never partially
//! applies.
//!
//! Connections come from a bounded pool. Each save holds a scoped `PoolConnection`
//! that goes back to the pool when dropped, whatever the outcome.

use crate::models::Article;
#[cfg(test)]
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS articles (
    url            TEXT PRIMARY KEY NOT NULL,
    outlet         TEXT NOT NULL,
    title          TEXT,
    description    TEXT,
    date_published TEXT,
    author         TEXT,
    keywords       TEXT,
    text           TEXT,
    editor         TEXT,
    date_scraped   TEXT NOT NULL
)
"#;

const INSERT_ARTICLE: &str = r#"
INSERT INTO articles
    (url, outlet, title, description, date_published, author, keywords, text, editor, date_scraped)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
ON CONFLICT(url) DO NOTHING
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid database url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What happened to a save attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The article was new and is now stored.
    Persisted,
    /// A row for this URL already existed; nothing was written.
    SkippedDuplicate,
}

/// Pool sizing for [`Store::connect`].
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Handle to the article table. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `database_url` and ensure the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - e.g. `sqlite://articles.db`
    /// * `settings` - Pool bounds
    #[instrument(level = "info", skip(settings))]
    pub async fn connect(database_url: &str, settings: PoolSettings) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|source| StoreError::InvalidUrl {
                url: database_url.to_string(),
                source,
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(settings.acquire_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(max_connections = settings.max_connections, "Article store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query(SCHEMA).execute(&mut *conn).await?;
        Ok(())
    }

    /// Persist an article unless its URL is already stored.
    ///
    /// # Returns
    ///
    /// [`SaveOutcome::Persisted`] when a row was written, [`SaveOutcome::SkippedDuplicate`]
    /// when the URL was already present, or an error when the database failed.
    #[instrument(level = "debug", skip_all, fields(url = %article.url))]
    pub async fn save(&self, article: &Article) -> Result<SaveOutcome, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query(INSERT_ARTICLE)
            .bind(article.url.as_str())
            .bind(article.outlet.as_str())
            .bind(article.title.as_deref())
            .bind(article.description.as_deref())
            .bind(article.date_published)
            .bind(article.author.as_deref())
            .bind(article.keywords.as_deref())
            .bind(article.text.as_deref())
            .bind(article.editor.as_deref())
            .bind(article.date_scraped)
            .execute(&mut *conn)
            .await?;

        let outcome = if result.rows_affected() == 0 {
            SaveOutcome::SkippedDuplicate
        } else {
            SaveOutcome::Persisted
        };
        debug!(?outcome, "Save finished");
        Ok(outcome)
    }

    /// Number of stored articles.
    pub async fn count(&self) -> Result<i64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Wait for checked-out connections to return, then close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
impl Store {
    /// Whether a row exists for `url`.
    pub async fn contains(&self, url: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM articles WHERE url = ?1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Fetch a stored article by URL.
    pub async fn get(&self, url: &str) -> Result<Option<Article>, StoreError> {
        let row: Option<ArticleRow> = sqlx::query_as(
            "SELECT url, outlet, title, description, date_published, author, keywords, text, \
             editor, date_scraped FROM articles WHERE url = ?1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Article::from))
    }
}

#[cfg(test)]
#[derive(sqlx::FromRow)]
struct ArticleRow {
    url: String,
    outlet: String,
    title: Option<String>,
    description: Option<String>,
    date_published: Option<NaiveDate>,
    author: Option<String>,
    keywords: Option<String>,
    text: Option<String>,
    editor: Option<String>,
    date_scraped: NaiveDate,
}

#[cfg(test)]
impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        Article {
            url: row.url,
            outlet: row.outlet,
            title: row.title,
            description: row.description,
            date_published: row.date_published,
            author: row.author,
            keywords: row.keywords,
            text: row.text,
            editor: row.editor,
            date_scraped: row.date_scraped,
        }
    }
}
