#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{Backend, DatabaseSettings};
use crate::error::{Error, Result};

/// One row of `job_listings`. `url` is the natural key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobListing {
    pub url: String,
    pub title: Option<String>,
    pub organization: Option<String>,
    pub location: Option<String>,
    pub posted_date: Option<String>,
    pub salary_info: Option<String>,
    pub source_site: Option<String>,
    /// NULL until enrichment succeeds.
    pub description: Option<String>,
    pub scraped_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl JobListing {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct Stats {
    pub total: usize,
    pub enriched: usize,
    pub pending: usize,
}

/// Persistence boundary for job listings.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create the table and unique index if missing. Never touches rows.
    async fn init_schema(&self) -> Result<()>;

    /// Insert unless `url` is already stored; existing rows are left as-is.
    async fn upsert_summary(&self, listing: &JobListing) -> Result<bool>;

    /// `upsert_summary` for a whole page in one transaction. Returns rows inserted.
    async fn insert_summaries(&self, listings: &[JobListing]) -> Result<usize>;

    /// URLs whose description is still NULL, oldest row first.
    async fn list_pending(&self, limit: Option<usize>) -> Result<Vec<String>>;

    /// Set description and `updated_at`. `false` when no row has `url`.
    async fn update_description(&self, url: &str, description: &str) -> Result<bool>;

    async fn get(&self, url: &str) -> Result<Option<JobListing>>;

    async fn stats(&self) -> Result<Stats>;
}

/// Open the configured backend.
pub async fn connect(settings: &DatabaseSettings) -> Result<Box<dyn RecordStore>> {
    match settings.backend {
        Backend::Sqlite => Ok(Box::new(sqlite::SqliteStore::open(&settings.path)?)),
        #[cfg(feature = "postgres")]
        Backend::Postgres => Ok(Box::new(postgres::PgStore::connect(settings).await?)),
        #[cfg(not(feature = "postgres"))]
        Backend::Postgres => Err(Error::Config(
            "built without the `postgres` feature".into(),
        )),
    }
}

/// Make sure the database itself exists (postgres creates it, SQLite creates
/// the file's directory).
pub async fn create_database(settings: &DatabaseSettings) -> Result<()> {
    match settings.backend {
        Backend::Sqlite => {
            if let Some(dir) = settings.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir).map_err(|e| {
                    Error::Connection(format!("cannot create {}: {}", dir.display(), e))
                })?;
            }
            Ok(())
        }
        #[cfg(feature = "postgres")]
        Backend::Postgres => postgres::create_database(settings).await,
        #[cfg(not(feature = "postgres"))]
        Backend::Postgres => Err(Error::Config(
            "built without the `postgres` feature".into(),
        )),
    }
}
