//! `update` stage: backfill descriptions for rows that still lack one.
//!
//! Each pending URL goes PENDING -> FETCHING -> ENRICHED or FAILED. A failed
//! URL keeps its NULL description and is picked up again by the next run;
//! it never stops the URLs after it.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::db::RecordStore;
use crate::error::{Error, Result};
use crate::fetch::{FetchMode, FetchSession, PageFetcher, WebFetcher};
use crate::parser::detail::DescriptionExtractor;

/// Enrichment stats returned after completion.
#[derive(Debug, Default)]
pub struct EnrichReport {
    pub processed: usize,
    pub enriched: usize,
    /// (url, reason) for every URL left pending.
    pub failed: Vec<(String, String)>,
}

pub struct Enricher<'a> {
    store: &'a dyn RecordStore,
    fetcher: &'a dyn PageFetcher,
    extractor: DescriptionExtractor,
    mode: FetchMode,
    delay: Duration,
    concurrency: usize,
}

impl<'a> Enricher<'a> {
    pub fn new(
        settings: &Settings,
        store: &'a dyn RecordStore,
        fetcher: &'a dyn PageFetcher,
    ) -> Result<Self> {
        Ok(Self {
            store,
            fetcher,
            extractor: DescriptionExtractor::new(&settings.selectors.description)?,
            mode: settings.update.detail_mode,
            delay: Duration::from_millis(settings.update.delay_ms),
            concurrency: settings.update.concurrency.max(1),
        })
    }

    /// Fetch, extract and store each URL. Fetch and extraction failures are
    /// recorded per URL; store and session failures end the run.
    pub async fn process(&self, urls: Vec<String>) -> Result<EnrichReport> {
        let mut seen = HashSet::new();
        let urls: Vec<String> = urls
            .into_iter()
            .filter(|u| {
                let first = seen.insert(u.clone());
                if !first {
                    debug!("Skipping repeated URL {}", u);
                }
                first
            })
            .collect();

        let total = urls.len();
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        // With concurrency 1 each fetch starts only after the previous
        // result was written.
        let mut results = stream::iter(urls.into_iter().enumerate())
            .map(move |(i, url)| async move {
                if i > 0 && !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                let fetched = self.fetch_description(&url).await;
                (url, fetched)
            })
            .buffered(self.concurrency);

        let mut report = EnrichReport::default();
        while let Some((url, fetched)) = results.next().await {
            report.processed += 1;
            pb.inc(1);

            match fetched {
                Ok(description) => {
                    if self.store.update_description(&url, &description).await? {
                        debug!("Enriched {}", url);
                        report.enriched += 1;
                    } else {
                        error!("No pending row for {} when storing its description", url);
                        report.failed.push((url, "no pending row".into()));
                    }
                }
                Err(e) if e.is_item_failure() => {
                    warn!("Leaving {} pending: {}", url, e);
                    report.failed.push((url, e.to_string()));
                }
                Err(e) => {
                    pb.abandon();
                    return Err(e);
                }
            }
        }

        pb.finish_and_clear();
        info!(
            "Processed {} detail pages ({} enriched, {} failed)",
            report.processed,
            report.enriched,
            report.failed.len()
        );
        Ok(report)
    }

    async fn fetch_description(&self, url: &str) -> Result<String> {
        let html = self.fetcher.fetch(url, self.mode).await?;
        self.extractor.extract(&html)
    }
}

/// The whole `update` stage. The browser session, if the detail mode needs
/// one, lives exactly as long as the batch and is closed even when the batch
/// fails.
pub async fn run_stage(
    settings: &Settings,
    store: &dyn RecordStore,
    limit: Option<usize>,
) -> Result<EnrichReport> {
    let mode = settings.update.detail_mode;
    run_with(settings, store, limit, || WebFetcher::for_mode(settings, mode)).await
}

/// `start` is only called when there is work to do.
async fn run_with<S, F, Fut>(
    settings: &Settings,
    store: &dyn RecordStore,
    limit: Option<usize>,
    start: S,
) -> Result<EnrichReport>
where
    S: FnOnce() -> Fut,
    Fut: Future<Output = Result<F>>,
    F: FetchSession,
{
    let pending = store.list_pending(limit).await?;
    if pending.is_empty() {
        info!("All jobs already have a description. No work to do.");
        return Ok(EnrichReport::default());
    }

    info!(
        "Found {} jobs to process ({:?} fetch)",
        pending.len(),
        settings.update.detail_mode
    );
    let fetcher = start().await?;

    let result = match Enricher::new(settings, store, &fetcher) {
        Ok(enricher) => enricher.process(pending).await,
        Err(e) => Err(e),
    };
    fetcher.shutdown().await;

    if let Err(Error::Session(msg)) = &result {
        error!("Browser session lost: {}", msg);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::SqliteStore;
    use crate::db::JobListing;
    use crate::fetch::testing::ScriptedFetcher;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const URL1: &str = "https://jobs.example/remote-jobs/url1";
    const URL2: &str = "https://jobs.example/remote-jobs/url2";
    const URL3: &str = "https://jobs.example/remote-jobs/url3";

    fn detail(text: &str) -> String {
        format!(
            "<html><body><div class=\"lis-container__job__content__description\">{}</div></body></html>",
            text
        )
    }

    fn settings() -> Settings {
        let mut s = Settings::default();
        s.update.delay_ms = 0;
        s
    }

    async fn store_with(urls: &[&str]) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init_schema().await.unwrap();
        for url in urls {
            store.upsert_summary(&JobListing::new(*url)).await.unwrap();
        }
        store
    }

    /// One pass over the pending rows with a caller-owned fetcher.
    async fn enrich(
        settings: &Settings,
        store: &SqliteStore,
        fetcher: &dyn PageFetcher,
        limit: Option<usize>,
    ) -> Result<EnrichReport> {
        let pending = store.list_pending(limit).await?;
        Enricher::new(settings, store, fetcher)?.process(pending).await
    }

    async fn description(store: &SqliteStore, url: &str) -> Option<String> {
        store.get(url).await.unwrap().unwrap().description
    }

    #[tokio::test]
    async fn one_timeout_leaves_only_that_row_pending() {
        let store = store_with(&[URL1, URL2]).await;
        let fetcher = ScriptedFetcher::default().page(URL1, &detail("Job A desc"));
        let settings = settings();

        let report = enrich(&settings, &store, &fetcher, None)
            .await
            .unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.enriched, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, URL2);
        assert_eq!(description(&store, URL1).await.as_deref(), Some("Job A desc"));
        assert_eq!(description(&store, URL2).await, None);
        assert_eq!(store.list_pending(None).await.unwrap(), vec![URL2]);
        assert_eq!(fetcher.modes(), vec![FetchMode::Dynamic, FetchMode::Dynamic]);
    }

    #[tokio::test]
    async fn failure_in_the_middle_does_not_stop_the_batch() {
        let store = store_with(&[URL1, URL2, URL3]).await;
        let fetcher = ScriptedFetcher::default()
            .page(URL1, &detail("one"))
            .page(URL2, "<html><body><p>Listing expired</p></body></html>")
            .page(URL3, &detail("three"));
        let settings = settings();

        let report = enrich(&settings, &store, &fetcher, None)
            .await
            .unwrap();

        assert_eq!(report.enriched, 2);
        assert_eq!(store.list_pending(None).await.unwrap(), vec![URL2]);
        assert_eq!(description(&store, URL3).await.as_deref(), Some("three"));
    }

    #[tokio::test]
    async fn nothing_pending_means_no_fetches() {
        let store = store_with(&[URL1, URL2]).await;
        store.update_description(URL1, "a").await.unwrap();
        store.update_description(URL2, "b").await.unwrap();
        let fetcher = ScriptedFetcher::default();
        let settings = settings();

        for _ in 0..2 {
            let report = enrich(&settings, &store, &fetcher, None).await.unwrap();
            assert_eq!(report.processed, 0);
        }
        assert_eq!(fetcher.calls(), 0);
        assert_eq!(description(&store, URL1).await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn rerun_retries_only_the_failed_rows() {
        let store = store_with(&[URL1, URL2]).await;
        let settings = settings();

        let first = ScriptedFetcher::default().page(URL1, &detail("A"));
        enrich(&settings, &store, &first, None)
            .await
            .unwrap();

        let second = ScriptedFetcher::default()
            .page(URL1, &detail("A changed"))
            .page(URL2, &detail("B"));
        let report = enrich(&settings, &store, &second, None)
            .await
            .unwrap();

        assert_eq!(second.calls(), 1);
        assert_eq!(report.enriched, 1);
        assert_eq!(description(&store, URL1).await.as_deref(), Some("A"));
        assert_eq!(description(&store, URL2).await.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn limit_caps_the_batch() {
        let store = store_with(&[URL1, URL2, URL3]).await;
        let fetcher = ScriptedFetcher::default()
            .page(URL1, &detail("1"))
            .page(URL2, &detail("2"))
            .page(URL3, &detail("3"));
        let settings = settings();

        let report = enrich(&settings, &store, &fetcher, Some(2))
            .await
            .unwrap();
        assert_eq!(report.enriched, 2);
        assert_eq!(store.list_pending(None).await.unwrap(), vec![URL3]);
    }

    #[tokio::test]
    async fn repeated_urls_are_fetched_once() {
        let store = store_with(&[URL1]).await;
        let fetcher = ScriptedFetcher::default().page(URL1, &detail("once"));
        let settings = settings();

        let report = Enricher::new(&settings, &store, &fetcher)
            .unwrap()
            .process(vec![URL1.into(), URL1.into()])
            .await
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_row_counts_as_failure() {
        let store = store_with(&[]).await;
        let fetcher = ScriptedFetcher::default().page(URL1, &detail("orphan"));
        let settings = settings();

        let report = Enricher::new(&settings, &store, &fetcher)
            .unwrap()
            .process(vec![URL1.into()])
            .await
            .unwrap();
        assert_eq!(report.enriched, 0);
        assert_eq!(report.failed, vec![(URL1.to_string(), "no pending row".to_string())]);
    }

    #[tokio::test]
    async fn concurrent_fetches_keep_failure_isolation() {
        let store = store_with(&[URL1, URL2, URL3]).await;
        let fetcher = ScriptedFetcher::default()
            .page(URL1, &detail("1"))
            .page(URL3, &detail("3"));
        let mut settings = settings();
        settings.update.concurrency = 3;

        let report = enrich(&settings, &store, &fetcher, None)
            .await
            .unwrap();
        assert_eq!(report.enriched, 2);
        assert_eq!(store.list_pending(None).await.unwrap(), vec![URL2]);
    }

    #[tokio::test]
    async fn enriched_row_keeps_its_description_when_processed_again() {
        let store = store_with(&[URL1]).await;
        store.update_description(URL1, "first").await.unwrap();
        let fetcher = ScriptedFetcher::default().page(URL1, &detail("second"));
        let settings = settings();

        let report = Enricher::new(&settings, &store, &fetcher)
            .unwrap()
            .process(vec![URL1.into()])
            .await
            .unwrap();
        assert_eq!(report.enriched, 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(description(&store, URL1).await.as_deref(), Some("first"));
    }

    /// Browser that dies on the second page.
    struct DyingBrowser;

    #[async_trait]
    impl PageFetcher for DyingBrowser {
        async fn fetch(&self, url: &str, _mode: FetchMode) -> Result<String> {
            if url == URL1 {
                Ok(detail("first"))
            } else {
                Err(Error::Session("target closed".into()))
            }
        }
    }

    #[tokio::test]
    async fn lost_session_aborts_but_keeps_earlier_work() {
        let store = store_with(&[URL1, URL2, URL3]).await;
        let settings = settings();

        let err = enrich(&settings, &store, &DyingBrowser, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Session(_)));
        assert_eq!(description(&store, URL1).await.as_deref(), Some("first"));
        assert_eq!(store.list_pending(None).await.unwrap(), vec![URL2, URL3]);
    }

    #[tokio::test]
    async fn stage_with_nothing_pending_never_starts_a_browser() {
        let store = store_with(&[URL1]).await;
        store.update_description(URL1, "done").await.unwrap();

        // Would fail to launch if attempted
        let mut settings = settings();
        settings.browser.remote_url = Some("http://127.0.0.1:1".into());

        let report = run_stage(&settings, &store, None).await.unwrap();
        assert_eq!(report.processed, 0);
    }

    /// Session whose release can be observed after the stage returns.
    struct TrackedSession {
        inner: Box<dyn PageFetcher>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PageFetcher for TrackedSession {
        async fn fetch(&self, url: &str, mode: FetchMode) -> Result<String> {
            self.inner.fetch(url, mode).await
        }
    }

    #[async_trait]
    impl FetchSession for TrackedSession {
        async fn shutdown(self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn tracked(inner: impl PageFetcher + 'static) -> (TrackedSession, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let session = TrackedSession {
            inner: Box::new(inner),
            closed: closed.clone(),
        };
        (session, closed)
    }

    #[tokio::test]
    async fn session_is_released_when_the_batch_aborts() {
        let store = store_with(&[URL1, URL2, URL3]).await;
        let (session, closed) = tracked(DyingBrowser);

        let err = run_with(&settings(), &store, None, move || async move { Ok(session) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Session(_)));
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(store.list_pending(None).await.unwrap(), vec![URL2, URL3]);
    }

    #[tokio::test]
    async fn session_is_released_after_a_partial_batch() {
        let store = store_with(&[URL1, URL2, URL3]).await;
        let (session, closed) = tracked(ScriptedFetcher::default().page(URL1, &detail("1")));

        let report = run_with(&settings(), &store, Some(2), move || async move { Ok(session) })
            .await
            .unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.enriched, 1);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn session_is_not_started_without_pending_rows() {
        let store = store_with(&[URL1]).await;
        store.update_description(URL1, "done").await.unwrap();
        let started = AtomicBool::new(false);

        let report = run_with(&settings(), &store, None, || {
            started.store(true, Ordering::SeqCst);
            async { Ok(tracked(ScriptedFetcher::default()).0) }
        })
        .await
        .unwrap();
        assert_eq!(report.processed, 0);
        assert!(!started.load(Ordering::SeqCst));
    }
}
