//! `scrape` stage: listing page(s) to summary rows.

use tracing::{info, warn};

use crate::config::Settings;
use crate::db::RecordStore;
use crate::error::Result;
use crate::fetch::{FetchMode, PageFetcher};
use crate::parser::listing::SummaryExtractor;

#[derive(Debug, Default, PartialEq)]
pub struct ScrapeStats {
    pub pages: usize,
    pub found: usize,
    pub inserted: usize,
}

/// Fetch every configured listing page, extract summaries and store the new
/// ones. A listing page that cannot be fetched ends the stage; rows from
/// pages already processed stay stored.
pub async fn run(
    settings: &Settings,
    store: &dyn RecordStore,
    fetcher: &dyn PageFetcher,
) -> Result<ScrapeStats> {
    let extractor = SummaryExtractor::new(&settings.selectors, &settings.scrape)?;
    let mut stats = ScrapeStats::default();

    for url in &settings.scrape.listing_urls {
        info!("Scraping jobs from: {}", url);
        let html = fetcher.fetch(url, FetchMode::Static).await?;

        let listings = extractor.extract(&html);
        if listings.is_empty() {
            warn!("No job listings found on {}", url);
        }

        let inserted = store.insert_summaries(&listings).await?;
        info!(
            "{}: {} listings, {} new",
            url,
            listings.len(),
            inserted
        );

        stats.pages += 1;
        stats.found += listings.len();
        stats.inserted += inserted;
    }

    Ok(stats)
}
