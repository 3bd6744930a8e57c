use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::{compile, compile_all, text};
use crate::config::{ScrapeSettings, Selectors};
use crate::db::JobListing;
use crate::error::{Error, Result};

/// Turns one listing page into summary records (no description).
pub struct SummaryExtractor {
    container: Selector,
    job_link: Selector,
    title: Vec<Selector>,
    organization: Vec<Selector>,
    location: Vec<Selector>,
    posted_date: Vec<Selector>,
    salary: Selector,
    base: Url,
    source_site: String,
}

impl SummaryExtractor {
    pub fn new(selectors: &Selectors, scrape: &ScrapeSettings) -> Result<Self> {
        let base = Url::parse(&scrape.base_url)
            .map_err(|e| Error::Config(format!("scrape.base_url: {}", e)))?;
        Ok(Self {
            container: compile(&selectors.container)?,
            job_link: compile(&selectors.job_link)?,
            title: compile_all(&selectors.title)?,
            organization: compile_all(&selectors.organization)?,
            location: compile_all(&selectors.location)?,
            posted_date: compile_all(&selectors.posted_date)?,
            salary: compile(&selectors.salary)?,
            base,
            source_site: scrape.source_site.clone(),
        })
    }

    /// Every item with a job link becomes a record; other fields are
    /// optional. A page without the container yields nothing.
    pub fn extract(&self, html: &str) -> Vec<JobListing> {
        let doc = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut listings = Vec::new();
        let mut items = 0;

        for item in doc.select(&self.container) {
            items += 1;
            let Some(url) = self.job_url(item) else {
                continue;
            };
            if !seen.insert(url.clone()) {
                continue;
            }

            listings.push(JobListing {
                title: first_text(item, &self.title),
                organization: first_text(item, &self.organization),
                location: first_text(item, &self.location),
                posted_date: first_text(item, &self.posted_date),
                salary_info: self.salary(item),
                source_site: Some(self.source_site.clone()),
                ..JobListing::new(url)
            });
        }

        debug!("{} list items, {} listings", items, listings.len());
        listings
    }

    /// First job link in the item, made absolute.
    fn job_url(&self, item: ElementRef<'_>) -> Option<String> {
        let href = item
            .select(&self.job_link)
            .find_map(|a| a.value().attr("href"))?;
        self.base.join(href.trim()).ok().map(String::from)
    }

    /// The category tag that carries a pay figure, if any.
    fn salary(&self, item: ElementRef<'_>) -> Option<String> {
        item.select(&self.salary)
            .filter_map(text::inline_text)
            .find(|t| t.contains('$') || t.contains("USD"))
    }
}

fn first_text(item: ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    selectors
        .iter()
        .find_map(|sel| item.select(sel).find_map(text::inline_text))
}
