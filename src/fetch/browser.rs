//! Headless Chrome session for detail pages populated by client-side script.
//!
//! One session is held for the whole enrichment phase; each fetch opens a
//! tab, waits until the page settles and the wanted element is present, then
//! closes the tab again.

use std::time::Duration;

use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::BrowserSettings;
use crate::error::{Error, FetchError, Result};

const SELECTOR_POLL: Duration = Duration::from_millis(250);

pub struct BrowserSession {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
    /// Launched by us (and so ours to close) rather than attached to.
    owned: bool,
    timeout: Duration,
    wait_for: Option<String>,
}

impl BrowserSession {
    pub async fn launch(
        settings: &BrowserSettings,
        timeout_secs: u64,
        wait_for: Option<String>,
    ) -> Result<Self> {
        let (browser, mut handler, owned) = match &settings.remote_url {
            Some(remote) => {
                let ws_url = resolve_ws_url(remote).await?;
                info!("Connecting to remote browser at {}", ws_url);
                let (browser, handler) = Browser::connect(ws_url)
                    .await
                    .map_err(|e| Error::Session(format!("cannot connect to browser: {}", e)))?;
                (browser, handler, false)
            }
            None => {
                info!("Launching browser (headless={})", settings.headless);
                let (browser, handler) = Browser::launch(build_config(settings, timeout_secs)?)
                    .await
                    .map_err(|e| Error::Session(format!("cannot launch browser: {}", e)))?;
                (browser, handler, true)
            }
        };

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser: Mutex::new(browser),
            handler,
            owned,
            timeout: Duration::from_secs(timeout_secs),
            wait_for,
        })
    }

    /// Rendered HTML of `url`, bounded by the session timeout. Only a lost
    /// connection to the browser is a session error; anything that goes wrong
    /// with this one page is a fetch error.
    pub async fn render(&self, url: &str) -> Result<String> {
        let opened = tokio::time::timeout(self.timeout, async {
            self.browser.lock().await.new_page("about:blank").await
        })
        .await;
        let page = match opened {
            Ok(page) => page.map_err(|e| page_error(url, self.timeout, e))?,
            Err(_) => return Err(timed_out(url, self.timeout)),
        };

        let rendered = tokio::time::timeout(self.timeout, self.load(&page, url)).await;
        let _ = page.close().await;

        match rendered {
            Ok(result) => result,
            Err(_) => Err(timed_out(url, self.timeout)),
        }
    }

    async fn load(&self, page: &Page, url: &str) -> Result<String> {
        let failed = |e: CdpError| page_error(url, self.timeout, e);

        debug!("Navigating to {}", url);
        page.goto(url).await.map_err(failed)?;
        page.wait_for_navigation().await.map_err(failed)?;

        if let Some(selector) = &self.wait_for {
            // Content arrives after load on script-driven pages
            while page.find_element(selector.as_str()).await.is_err() {
                tokio::time::sleep(SELECTOR_POLL).await;
            }
        }

        page.content().await.map_err(failed)
    }

    pub async fn close(self) {
        if self.owned {
            let mut browser = self.browser.into_inner();
            if let Err(e) = browser.close().await {
                debug!("Browser close failed: {}", e);
            }
            let _ = browser.wait().await;
        }
        self.handler.abort();
    }
}

fn timed_out(url: &str, timeout: Duration) -> Error {
    FetchError::Timeout {
        url: url.to_string(),
        secs: timeout.as_secs(),
    }
    .into()
}

fn page_error(url: &str, timeout: Duration, e: CdpError) -> Error {
    match e {
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => {
            Error::Session(format!("lost connection to browser: {}", e))
        }
        CdpError::Timeout => timed_out(url, timeout),
        other => FetchError::Navigation {
            url: url.to_string(),
            message: other.to_string(),
        }
        .into(),
    }
}

fn build_config(settings: &BrowserSettings, timeout_secs: u64) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_secs(timeout_secs))
        .arg("--disable-dev-shm-usage")
        .arg("--disable-gpu")
        .arg("--no-first-run")
        .arg("--no-sandbox");

    // with_head means NOT headless
    if !settings.headless {
        builder = builder.with_head();
    }
    if let Some(path) = &settings.chrome_path {
        builder = builder.chrome_executable(path);
    }
    for arg in &settings.args {
        builder = builder.arg(arg.as_str());
    }

    builder
        .build()
        .map_err(|e| Error::Session(format!("invalid browser config: {}", e)))
}

/// DevTools websocket URL for `remote`; http endpoints are asked via /json/version.
async fn resolve_ws_url(remote: &str) -> Result<String> {
    if remote.starts_with("ws://") || remote.starts_with("wss://") {
        return Ok(remote.to_string());
    }

    let version_url = format!("{}/json/version", remote.trim_end_matches('/'));
    let info: serde_json::Value = reqwest::get(&version_url)
        .await
        .map_err(|e| Error::Session(format!("cannot reach {}: {}", version_url, e)))?
        .json()
        .await
        .map_err(|e| Error::Session(format!("bad response from {}: {}", version_url, e)))?;

    info.get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Session(format!("no webSocketDebuggerUrl at {}", version_url)))
}
