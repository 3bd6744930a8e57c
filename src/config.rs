use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};
use crate::fetch::FetchMode;

const DEFAULT_CONFIG_FILE: &str = "jobscrape.toml";
const ENV_PREFIX: &str = "JOBSCRAPE";

/// Everything the stages need, loaded once at startup and passed down.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub scrape: ScrapeSettings,
    pub fetch: FetchSettings,
    pub update: UpdateSettings,
    pub browser: BrowserSettings,
    pub selectors: Selectors,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
    Postgres,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub backend: Backend,
    /// SQLite file.
    pub path: PathBuf,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: Option<String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Sqlite,
            path: PathBuf::from("data/jobs.sqlite"),
            host: "localhost".into(),
            port: 5432,
            name: "internship_assessment".into(),
            user: "postgres".into(),
            password: None,
        }
    }
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("backend", &self.backend)
            .field("path", &self.path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScrapeSettings {
    pub listing_urls: Vec<String>,
    /// Relative job links are resolved against this.
    pub base_url: String,
    pub source_site: String,
    pub user_agent: String,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            listing_urls: vec![
                "https://weworkremotely.com/categories/remote-full-stack-programming-jobs".into(),
            ],
            base_url: "https://weworkremotely.com".into(),
            source_site: "WeWorkRemotely".into(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_secs: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self { timeout_secs: 15 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpdateSettings {
    pub detail_mode: FetchMode,
    pub delay_ms: u64,
    pub concurrency: usize,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            detail_mode: FetchMode::Dynamic,
            delay_ms: 2000,
            concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    /// Auto-detected when unset.
    pub chrome_path: Option<PathBuf>,
    /// DevTools endpoint of an already running browser (ws:// or http://).
    pub remote_url: Option<String>,
    pub args: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            remote_url: None,
            args: Vec::new(),
        }
    }
}

/// CSS selectors for the listing and detail pages. Field lists are tried in
/// order; the first match with non-empty text wins.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub container: String,
    pub job_link: String,
    pub title: Vec<String>,
    pub organization: Vec<String>,
    pub location: Vec<String>,
    pub posted_date: Vec<String>,
    pub salary: String,
    pub description: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            container: "section#category-2 li".into(),
            job_link: "a[href*='/remote-jobs/']".into(),
            title: vec!["h4.new-listing__header__title".into(), "span.title".into()],
            organization: vec!["p.new-listing__company-name".into(), "span.company".into()],
            location: vec![
                "p.new-listing__company-headquarters".into(),
                "span.region".into(),
            ],
            posted_date: vec!["p.new-listing__header__date".into(), "span.date".into()],
            salary: "div.new-listing__categories p.new-listing__categories__category".into(),
            description: "div.lis-container__job__content__description".into(),
        }
    }
}

impl Selectors {
    fn all(&self) -> impl Iterator<Item = &str> {
        [&self.container, &self.job_link, &self.salary, &self.description]
            .into_iter()
            .chain(&self.title)
            .chain(&self.organization)
            .chain(&self.location)
            .chain(&self.posted_date)
            .map(String::as_str)
    }
}

impl Settings {
    /// Layer defaults, the config file, `.env` and `JOBSCRAPE_*` variables.
    ///
    /// An explicit `path` must exist; the default `jobscrape.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // A missing .env is normal
        let _ = dotenvy::dotenv();

        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let raw = ::config::Config::builder()
            .add_source(::config::File::from(file).required(required))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("scrape.listing_urls")
                    .with_list_parse_key("browser.args")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Self::from_config(raw)
    }

    pub fn from_config(raw: ::config::Config) -> Result<Self> {
        raw.try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject settings that would only fail later, mid-stage.
    pub fn validate(&self) -> Result<()> {
        if self.scrape.listing_urls.is_empty() {
            return Err(Error::Config("scrape.listing_urls is empty".into()));
        }
        for u in &self.scrape.listing_urls {
            check_http_url("scrape.listing_urls", u)?;
        }
        check_http_url("scrape.base_url", &self.scrape.base_url)?;

        if self.fetch.timeout_secs == 0 {
            return Err(Error::Config("fetch.timeout_secs must be positive".into()));
        }
        if self.update.concurrency == 0 {
            return Err(Error::Config("update.concurrency must be at least 1".into()));
        }
        if self.database.backend == Backend::Postgres && self.database.password.is_none() {
            return Err(Error::Config(
                "database.password is required for the postgres backend".into(),
            ));
        }

        for s in self.selectors.all() {
            scraper::Selector::parse(s)
                .map_err(|e| Error::Config(format!("invalid selector {:?}: {}", s, e)))?;
        }
        Ok(())
    }
}

fn check_http_url(key: &str, raw: &str) -> Result<()> {
    let parsed =
        Url::parse(raw).map_err(|e| Error::Config(format!("{}: {:?} is not a URL: {}", key, raw, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::Config(format!(
            "{}: unsupported scheme {:?} in {:?}",
            key, other, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with(pairs: &[(&str, &str)]) -> Result<Settings> {
        let mut b = ::config::Config::builder();
        for (k, v) in pairs {
            b = b.set_override(*k, *v).unwrap();
        }
        Settings::from_config(b.build().unwrap())
    }

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        s.validate().unwrap();
        assert_eq!(s.database.backend, Backend::Sqlite);
        assert_eq!(s.fetch.timeout_secs, 15);
        assert_eq!(s.update.detail_mode, FetchMode::Dynamic);
        assert_eq!(s.update.concurrency, 1);
    }

    #[test]
    fn overrides_merge_with_defaults() {
        let s = with(&[
            ("database.backend", "postgres"),
            ("database.password", "hunter2"),
            ("update.detail_mode", "static"),
        ])
        .unwrap();
        assert_eq!(s.database.backend, Backend::Postgres);
        assert_eq!(s.database.port, 5432);
        assert_eq!(s.update.detail_mode, FetchMode::Static);
        assert_eq!(s.scrape.source_site, "WeWorkRemotely");
        s.validate().unwrap();
    }

    #[test]
    fn postgres_without_password_is_rejected() {
        let s = with(&[("database.backend", "postgres")]).unwrap();
        assert!(matches!(s.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn bad_listing_url_is_rejected() {
        let mut s = Settings::default();
        s.scrape.listing_urls = vec!["ftp://example.com/jobs".into()];
        assert!(matches!(s.validate(), Err(Error::Config(_))));

        s.scrape.listing_urls = vec!["not a url".into()];
        assert!(matches!(s.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn bad_selector_is_rejected() {
        let mut s = Settings::default();
        s.selectors.description = "div[[".into();
        assert!(matches!(s.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut s = Settings::default();
        s.fetch.timeout_secs = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn password_is_redacted_in_debug() {
        let mut db = DatabaseSettings::default();
        db.password = Some("hunter2".into());
        let shown = format!("{:?}", db);
        assert!(!shown.contains("hunter2"));
    }
}
