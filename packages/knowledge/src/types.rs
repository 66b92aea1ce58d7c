//! Core data types shared across the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Result of fetching a single page. Produced by the crawler, consumed by
/// the knowledge service, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawledPage {
    /// Normalized URL (fragment stripped).
    pub url: String,

    /// Page title, empty when the page has none.
    pub title: String,

    /// Extracted plain text.
    pub text: String,

    /// When the page was fetched.
    pub crawled_at: DateTime<Utc>,
}

impl CrawledPage {
    /// Create a page fetched now.
    pub fn new(url: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            text: text.into(),
            crawled_at: Utc::now(),
        }
    }
}

/// One indexable unit of text, carrying its provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Deterministic id: `sha256(source_url)[..16]_{chunk_index}`.
    pub id: String,

    /// Chunk body.
    pub text: String,

    /// Normalized URL of the originating page.
    pub source_url: String,

    /// Zero-based position within the page.
    pub chunk_index: usize,

    /// Title of the originating page.
    pub title: String,

    /// RFC 3339 timestamp of the crawl that produced this chunk.
    pub crawled_at: String,
}

impl Chunk {
    /// Build a chunk from a crawled page and its position.
    pub fn from_page(page: &CrawledPage, chunk_index: usize, text: impl Into<String>) -> Self {
        Self {
            id: chunk_id(&page.url, chunk_index),
            text: text.into(),
            source_url: page.url.clone(),
            chunk_index,
            title: page.title.clone(),
            crawled_at: page.crawled_at.to_rfc3339(),
        }
    }
}

/// Deterministic chunk id from the normalized source URL and position.
///
/// The first 16 hex characters of the URL's SHA-256 keep collisions
/// negligible while reconciling ids across the vector and BM25 indexes.
pub fn chunk_id(source_url: &str, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_url.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}_{}", &digest[..16], chunk_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_is_deterministic() {
        let a = chunk_id("https://example.com/page", 0);
        let b = chunk_id("https://example.com/page", 0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_chunk_id_changes_with_url_and_index() {
        let base = chunk_id("https://example.com/page", 0);
        assert_ne!(base, chunk_id("https://example.com/other", 0));
        assert_ne!(base, chunk_id("https://example.com/page", 1));
    }

    #[test]
    fn test_chunk_id_shape() {
        let id = chunk_id("https://example.com/page", 12);
        let (hash, index) = id.split_once('_').unwrap();
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(index, "12");
    }

    #[test]
    fn test_chunk_from_page() {
        let page = CrawledPage::new("https://example.com/a", "Title", "Body text.");
        let chunk = Chunk::from_page(&page, 2, "Body text.");
        assert_eq!(chunk.source_url, "https://example.com/a");
        assert_eq!(chunk.chunk_index, 2);
        assert_eq!(chunk.id, chunk_id("https://example.com/a", 2));
        assert_eq!(chunk.title, "Title");
    }
}
