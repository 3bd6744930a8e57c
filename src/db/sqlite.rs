use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use super::{JobListing, RecordStore, Stats};
use crate::error::{Error, Result};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| Error::Connection(format!("cannot create {}: {}", dir.display(), e)))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::Connection(format!("cannot open {}: {}", path.display(), e)))?;
        Self::configure(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| Error::Connection(e.to_string()))?;
        Self::configure(conn)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("connection mutex poisoned".into()))
    }
}

const INSERT_SQL: &str = "INSERT INTO job_listings
     (url, title, organization, location, posted_date, salary_info, source_site, scraped_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
     ON CONFLICT(url) DO NOTHING";

fn insert(stmt: &mut rusqlite::Statement<'_>, l: &JobListing) -> rusqlite::Result<usize> {
    stmt.execute(rusqlite::params![
        l.url,
        l.title,
        l.organization,
        l.location,
        l.posted_date,
        l.salary_info,
        l.source_site,
        Utc::now(),
    ])
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS job_listings (
                id           INTEGER PRIMARY KEY,
                url          TEXT UNIQUE NOT NULL,
                title        TEXT,
                organization TEXT,
                location     TEXT,
                posted_date  TEXT,
                salary_info  TEXT,
                source_site  TEXT,
                description  TEXT,
                scraped_at   TEXT NOT NULL,
                updated_at   TEXT
            );
            ",
        )?;
        Ok(())
    }

    async fn upsert_summary(&self, listing: &JobListing) -> Result<bool> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(INSERT_SQL)?;
        Ok(insert(&mut stmt, listing)? > 0)
    }

    async fn insert_summaries(&self, listings: &[JobListing]) -> Result<usize> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(INSERT_SQL)?;
            for l in listings {
                count += insert(&mut stmt, l)?;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    async fn list_pending(&self, limit: Option<usize>) -> Result<Vec<String>> {
        let sql = match limit {
            Some(n) => format!(
                "SELECT url FROM job_listings WHERE description IS NULL ORDER BY id LIMIT {}",
                n
            ),
            None => "SELECT url FROM job_listings WHERE description IS NULL ORDER BY id".to_string(),
        };
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
    }

    async fn update_description(&self, url: &str, description: &str) -> Result<bool> {
        let changed = self.conn()?.execute(
            "UPDATE job_listings SET description = ?1, updated_at = ?2
             WHERE url = ?3 AND description IS NULL",
            rusqlite::params![description, Utc::now(), url],
        )?;
        Ok(changed > 0)
    }

    async fn get(&self, url: &str) -> Result<Option<JobListing>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT url, title, organization, location, posted_date, salary_info,
                        source_site, description, scraped_at, updated_at
                 FROM job_listings WHERE url = ?1",
                [url],
                |row| {
                    Ok(JobListing {
                        url: row.get(0)?,
                        title: row.get(1)?,
                        organization: row.get(2)?,
                        location: row.get(3)?,
                        posted_date: row.get(4)?,
                        salary_info: row.get(5)?,
                        source_site: row.get(6)?,
                        description: row.get(7)?,
                        scraped_at: row.get(8)?,
                        updated_at: row.get(9)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    async fn stats(&self) -> Result<Stats> {
        let (total, enriched): (usize, usize) = self.conn()?.query_row(
            "SELECT COUNT(*), COUNT(description) FROM job_listings",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(Stats {
            total,
            enriched,
            pending: total.saturating_sub(enriched),
        })
    }
}
