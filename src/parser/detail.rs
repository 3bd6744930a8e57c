use scraper::{Html, Selector};

use super::{compile, text};
use crate::error::{Error, Result};

/// Pulls the full description out of a rendered detail page.
pub struct DescriptionExtractor {
    selector: Selector,
}

impl DescriptionExtractor {
    pub fn new(selector: &str) -> Result<Self> {
        Ok(Self {
            selector: compile(selector)?,
        })
    }

    /// Text of the first matching element. A missing or blank element is an
    /// extraction error, so the row stays pending.
    pub fn extract(&self, html: &str) -> Result<String> {
        let doc = Html::parse_document(html);
        let el = doc
            .select(&self.selector)
            .next()
            .ok_or_else(|| Error::Extraction("description element not found".into()))?;

        let description = text::block_text(el);
        if description.is_empty() {
            return Err(Error::Extraction("description element is empty".into()));
        }
        Ok(description)
    }
}
