pub mod detail;
pub mod listing;
pub mod text;

use scraper::Selector;

use crate::error::{Error, Result};

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| Error::Config(format!("invalid selector {:?}: {}", selector, e)))
}

fn compile_all(selectors: &[String]) -> Result<Vec<Selector>> {
    selectors.iter().map(|s| compile(s)).collect()
}
