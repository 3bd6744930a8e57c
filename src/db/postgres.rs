use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

use super::{JobListing, RecordStore, Stats};
use crate::config::DatabaseSettings;
use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maintenance database used to create the target one.
const ADMIN_DATABASE: &str = "postgres";

const INSERT_SQL: &str = "INSERT INTO job_listings
     (url, title, organization, location, posted_date, salary_info, source_site)
     VALUES ($1, $2, $3, $4, $5, $6, $7)
     ON CONFLICT (url) DO NOTHING";

pub struct PgStore {
    client: Mutex<Client>,
}

impl PgStore {
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let client = open(settings, &settings.name).await?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

/// Connect to `dbname` and drive the connection on a background task.
async fn open(settings: &DatabaseSettings, dbname: &str) -> Result<Client> {
    let mut config = tokio_postgres::Config::new();
    config
        .host(&settings.host)
        .port(settings.port)
        .dbname(dbname)
        .user(&settings.user)
        .connect_timeout(CONNECT_TIMEOUT);
    if let Some(password) = &settings.password {
        config.password(password);
    }

    let (client, connection) = config.connect(NoTls).await.map_err(|e| {
        Error::Connection(format!(
            "{}@{}:{}/{}: {}",
            settings.user, settings.host, settings.port, dbname, e
        ))
    })?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("PostgreSQL connection error: {}", e);
        }
    });
    Ok(client)
}

/// Create `settings.name` unless it exists. CREATE DATABASE cannot run inside
/// a transaction, so this goes through the maintenance database.
pub async fn create_database(settings: &DatabaseSettings) -> Result<()> {
    let admin = open(settings, ADMIN_DATABASE).await?;
    let exists = admin
        .query_opt("SELECT 1 FROM pg_database WHERE datname = $1", &[&settings.name])
        .await?
        .is_some();

    if exists {
        info!("Database '{}' already exists", settings.name);
    } else {
        admin
            .batch_execute(&format!("CREATE DATABASE {}", quote_ident(&settings.name)))
            .await?;
        info!("Database '{}' created", settings.name);
    }
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_listing(row: &tokio_postgres::Row) -> JobListing {
    JobListing {
        url: row.get(0),
        title: row.get(1),
        organization: row.get(2),
        location: row.get(3),
        posted_date: row.get(4),
        salary_info: row.get(5),
        source_site: row.get(6),
        description: row.get(7),
        scraped_at: row.get(8),
        updated_at: row.get(9),
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn init_schema(&self) -> Result<()> {
        self.client
            .lock()
            .await
            .batch_execute(
                "
                CREATE TABLE IF NOT EXISTS job_listings (
                    id           SERIAL PRIMARY KEY,
                    url          VARCHAR(512) UNIQUE NOT NULL,
                    title        VARCHAR(255),
                    organization VARCHAR(255),
                    location     VARCHAR(255),
                    posted_date  VARCHAR(64),
                    salary_info  TEXT,
                    source_site  VARCHAR(100),
                    description  TEXT,
                    scraped_at   TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                    updated_at   TIMESTAMPTZ
                );
                ",
            )
            .await?;
        Ok(())
    }

    async fn upsert_summary(&self, l: &JobListing) -> Result<bool> {
        let n = self
            .client
            .lock()
            .await
            .execute(
                INSERT_SQL,
                &[
                    &l.url,
                    &l.title,
                    &l.organization,
                    &l.location,
                    &l.posted_date,
                    &l.salary_info,
                    &l.source_site,
                ],
            )
            .await?;
        Ok(n > 0)
    }

    async fn insert_summaries(&self, listings: &[JobListing]) -> Result<usize> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;
        let stmt = tx.prepare(INSERT_SQL).await?;
        let mut count = 0;
        for l in listings {
            count += tx
                .execute(
                    &stmt,
                    &[
                        &l.url,
                        &l.title,
                        &l.organization,
                        &l.location,
                        &l.posted_date,
                        &l.salary_info,
                        &l.source_site,
                    ],
                )
                .await?;
        }
        tx.commit().await?;
        Ok(count as usize)
    }

    async fn list_pending(&self, limit: Option<usize>) -> Result<Vec<String>> {
        // LIMIT NULL means no limit
        let limit = limit.map(|n| n as i64);
        let rows = self
            .client
            .lock()
            .await
            .query(
                "SELECT url FROM job_listings WHERE description IS NULL ORDER BY id LIMIT $1",
                &[&limit],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn update_description(&self, url: &str, description: &str) -> Result<bool> {
        let n = self
            .client
            .lock()
            .await
            .execute(
                "UPDATE job_listings SET description = $1, updated_at = now()
                 WHERE url = $2 AND description IS NULL",
                &[&description, &url],
            )
            .await?;
        Ok(n > 0)
    }

    async fn get(&self, url: &str) -> Result<Option<JobListing>> {
        let row = self
            .client
            .lock()
            .await
            .query_opt(
                "SELECT url, title, organization, location, posted_date, salary_info,
                        source_site, description, scraped_at, updated_at
                 FROM job_listings WHERE url = $1",
                &[&url],
            )
            .await?;
        Ok(row.as_ref().map(to_listing))
    }

    async fn stats(&self) -> Result<Stats> {
        let row = self
            .client
            .lock()
            .await
            .query_one(
                "SELECT COUNT(*), COUNT(description) FROM job_listings",
                &[],
            )
            .await?;
        let total: i64 = row.get(0);
        let enriched: i64 = row.get(1);
        Ok(Stats {
            total: total as usize,
            enriched: enriched as usize,
            pending: (total - enriched) as usize,
        })
    }
}
