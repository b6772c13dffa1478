use std::sync::Arc;

use regex::Regex;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use tokio::task::spawn_blocking;

use crate::{Error, Result};

/// Selector of the summary line: "About 1,234 results (0.03 sec)".
pub const RESULT_COUNT_SELECTOR: &str = "div#gs_ab_md";

/// Turns a results page into a result count.
pub trait Extract: Send + Sync {
    fn extract(&self, html: &str) -> Result<u64>;
}

/// Reads the count out of the summary block of a results page.
pub struct ResultCountExtractor {
    marker: Selector,
    number: Regex,
}

impl ResultCountExtractor {
    pub fn new() -> Result<Self> {
        Self::with_marker(RESULT_COUNT_SELECTOR)
    }

    pub fn with_marker(marker: &str) -> Result<Self> {
        Ok(ResultCountExtractor {
            marker: create_selector(marker)?,
            // Either comma separated thousands groups or a plain run of ASCII digits.
            number: Regex::new(r"[0-9]{1,3}(?:,[0-9]{3})+|[0-9]+")
                .map_err(|e| Error::InvalidSelector(e.to_string()))?,
        })
    }
}

impl Extract for ResultCountExtractor {
    fn extract(&self, html: &str) -> Result<u64> {
        let doc = Html::parse_document(html);
        let Some(marker) = doc.select(&self.marker).next() else {
            return Err(Error::MarkerNotFound {
                digest: digest(html),
                document: html.to_string(),
            });
        };

        let text = marker.text().collect::<String>();
        let Some(found) = self.number.find(&text) else {
            // A summary without any number means nothing was found.
            return Ok(0);
        };
        let digits = found.as_str().replace(',', "");
        digits
            .parse()
            .map_err(|_| Error::UnparsableCount(found.as_str().to_string()))
    }
}

/// Runs the extractor on the blocking pool, parsing a full document is CPU bound.
pub(crate) async fn extract_blocking(extractor: Arc<dyn Extract>, html: String) -> Result<u64> {
    spawn_blocking(move || extractor.extract(&html)).await?
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::InvalidSelector(sel_str.into()))
}

fn digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}
