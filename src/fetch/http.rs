use std::time::Duration;

use tracing::debug;

use crate::config::{FetchSettings, ScrapeSettings};
use crate::error::{Error, FetchError, Result};

/// Plain HTTP GET with a browser-like user agent.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(scrape: &ScrapeSettings, fetch: &FetchSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(scrape.user_agent.as_str())
            .timeout(Duration::from_secs(fetch.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            timeout_secs: fetch.timeout_secs,
        })
    }

    pub async fn get(&self, url: &str) -> Result<String> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let body = response.text().await.map_err(|e| self.classify(url, e))?;
        Ok(body)
    }

    fn classify(&self, url: &str, e: reqwest::Error) -> Error {
        let url = url.to_string();
        if e.is_timeout() {
            FetchError::Timeout {
                url,
                secs: self.timeout_secs,
            }
            .into()
        } else {
            FetchError::Network {
                url,
                message: e.to_string(),
            }
            .into()
        }
    }
}
