//! Test doubles: fixture-backed page source and helpers.
//!
//! [`StaticPages`] serves canned pages without touching the network, so
//! service-level tests (and `init-test-db`) exercise the full chunk →
//! index → retrieve path deterministically.

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;
use url::Url;

use crate::crawl::guard::defragment;
use crate::crawl::PageSource;
use crate::error::{CrawlResult, SecurityError, SecurityResult};
use crate::types::CrawledPage;

pub use crate::embedding::HashEmbedding;

/// In-memory [`PageSource`] serving fixed pages.
#[derive(Debug, Default)]
pub struct StaticPages {
    pages: HashMap<String, CrawledPage>,
    index_links: Vec<String>,
}

impl StaticPages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page served for its URL.
    pub fn with_page(
        mut self,
        url: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let url = defragment(&url.into());
        self.pages
            .insert(url.clone(), CrawledPage::new(url, title, text));
        self
    }

    /// Links returned by `discover` (before pattern filtering).
    pub fn with_index_links(mut self, links: Vec<String>) -> Self {
        self.index_links = links;
        self
    }
}

#[async_trait]
impl PageSource for StaticPages {
    async fn validate(&self, url: &str) -> SecurityResult<String> {
        let mut parsed = Url::parse(url)?;
        parsed.set_fragment(None);
        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(SecurityError::DisallowedScheme(scheme.to_string()));
        }
        if parsed.host_str().is_none() {
            return Err(SecurityError::NoHost);
        }
        Ok(parsed.to_string())
    }

    async fn fetch_page(&self, url: &str) -> Option<CrawledPage> {
        self.pages.get(&defragment(url)).cloned()
    }

    async fn discover(&self, _index_url: &str, pattern: Option<&str>) -> CrawlResult<Vec<String>> {
        let pattern = pattern
            .filter(|p| !p.is_empty())
            .map(Regex::new)
            .transpose()?;
        Ok(self
            .index_links
            .iter()
            .filter(|link| pattern.as_ref().is_none_or(|re| re.is_match(link)))
            .cloned()
            .collect())
    }
}
