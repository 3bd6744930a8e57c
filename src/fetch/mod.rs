//! Page retrieval. Callers depend on [`PageFetcher`] only; whether a page is
//! fetched with a plain HTTP request or rendered in a headless browser is
//! chosen per call with [`FetchMode`].

#[cfg(feature = "browser")]
pub mod browser;
pub mod http;

use async_trait::async_trait;
use serde::Deserialize;
#[cfg(feature = "browser")]
use tracing::info;

use crate::config::Settings;
use crate::error::{Error, Result};
use http::HttpFetcher;

#[cfg(feature = "browser")]
use browser::BrowserSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Direct request, response body as-is.
    Static,
    /// Rendered by a browser after client-side scripts ran.
    Dynamic,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, mode: FetchMode) -> Result<String>;
}

/// A fetcher that holds resources for the length of a phase.
#[async_trait]
pub trait FetchSession: PageFetcher {
    /// Release the session; called once when the phase ends, however it ended.
    async fn shutdown(self);
}

/// Static fetches plus, when a session was started, dynamic ones.
pub struct WebFetcher {
    http: HttpFetcher,
    #[cfg(feature = "browser")]
    browser: Option<BrowserSession>,
}

impl WebFetcher {
    /// Static-only fetcher; dynamic requests fail with a session error.
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(&settings.scrape, &settings.fetch)?,
            #[cfg(feature = "browser")]
            browser: None,
        })
    }

    /// Fetcher able to serve `mode`; starts a browser session for dynamic.
    pub async fn for_mode(settings: &Settings, mode: FetchMode) -> Result<Self> {
        let fetcher = Self::new(settings)?;
        match mode {
            FetchMode::Static => Ok(fetcher),
            FetchMode::Dynamic => fetcher.with_browser(settings).await,
        }
    }

    #[cfg(feature = "browser")]
    async fn with_browser(mut self, settings: &Settings) -> Result<Self> {
        let session = BrowserSession::launch(
            &settings.browser,
            settings.fetch.timeout_secs,
            Some(settings.selectors.description.clone()),
        )
        .await?;
        self.browser = Some(session);
        Ok(self)
    }

    #[cfg(not(feature = "browser"))]
    async fn with_browser(self, _settings: &Settings) -> Result<Self> {
        Err(Error::Session(
            "built without the `browser` feature; set update.detail_mode = \"static\"".into(),
        ))
    }
}

#[async_trait]
impl FetchSession for WebFetcher {
    async fn shutdown(self) {
        #[cfg(feature = "browser")]
        if let Some(session) = self.browser {
            session.close().await;
            info!("Browser session closed");
        }
    }
}

#[async_trait]
impl PageFetcher for WebFetcher {
    async fn fetch(&self, url: &str, mode: FetchMode) -> Result<String> {
        match mode {
            FetchMode::Static => self.http.get(url).await,
            #[cfg(feature = "browser")]
            FetchMode::Dynamic => match &self.browser {
                Some(session) => session.render(url).await,
                None => Err(Error::Session("no browser session started".into())),
            },
            #[cfg(not(feature = "browser"))]
            FetchMode::Dynamic => Err(Error::Session("built without the `browser` feature".into())),
        }
    }
}
