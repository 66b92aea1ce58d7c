//! Configuration for the knowledge engine.
//!
//! Plain structs with builder-style setters; cross-field constraints are
//! checked by [`KnowledgeConfig::validate`] before any service is built.

use std::time::Duration;

use crate::error::{KnowledgeError, Result};

/// Fixed User-Agent sent with every request, including robots.txt fetches.
pub const USER_AGENT: &str = "KnowledgeBot/1.0";

/// Crawler bounds and politeness settings.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Total per-request timeout.
    pub timeout: Duration,

    /// Hard cap on URLs extracted from an index page.
    pub max_pages: usize,

    /// Minimum delay between two requests to the same host.
    pub crawl_delay: Duration,

    /// Global bound on in-flight requests across all hosts.
    pub max_concurrent: usize,

    /// Whether robots.txt Disallow / Crawl-delay are honored.
    pub respect_robots_txt: bool,

    /// How long a fetched robots.txt stays cached per host.
    pub robots_cache_ttl: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_pages: 50,
            crawl_delay: Duration::from_secs(1),
            max_concurrent: 5,
            respect_robots_txt: true,
            robots_cache_ttl: Duration::from_secs(3600),
        }
    }
}

impl CrawlerConfig {
    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the index-page URL cap.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Set the per-host delay.
    pub fn with_crawl_delay(mut self, delay: Duration) -> Self {
        self.crawl_delay = delay;
        self
    }

    /// Set the global concurrency bound.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Disable robots.txt handling entirely.
    pub fn ignore_robots_txt(mut self) -> Self {
        self.respect_robots_txt = false;
        self
    }

    /// Set the robots.txt cache TTL.
    pub fn with_robots_cache_ttl(mut self, ttl: Duration) -> Self {
        self.robots_cache_ttl = ttl;
        self
    }
}

/// BM25 ranking parameters.
///
/// `k1` controls term-frequency saturation, `b` length normalization.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 2.5, b: 0.5 }
    }
}

impl Bm25Params {
    /// Create parameters, checking `k1 > 0` and `0 <= b <= 1`.
    pub fn new(k1: f32, b: f32) -> Result<Self> {
        if !(k1 > 0.0) {
            return Err(KnowledgeError::Config(format!(
                "bm25_k1 must be positive, got {k1}"
            )));
        }
        if !(0.0..=1.0).contains(&b) {
            return Err(KnowledgeError::Config(format!(
                "bm25_b must be between 0.0 and 1.0, got {b}"
            )));
        }
        Ok(Self { k1, b })
    }
}

/// Top-level retrieval configuration.
#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    /// Maximum characters per prose chunk.
    pub chunk_size: usize,

    /// Characters carried over between consecutive prose chunks.
    pub chunk_overlap: usize,

    /// Default number of results for `retrieve`.
    pub retrieval_count: usize,

    /// Vector-side quality gate on cosine distance; `None` disables.
    pub similarity_threshold: Option<f32>,

    /// Route `retrieve` through hybrid search when a BM25 index exists.
    pub hybrid_search_enabled: bool,

    /// Fusion weight α for the vector side, clamped to `[0, 1]`.
    pub vector_weight: f32,

    /// Post-fusion cutoff on the combined score; `None` disables.
    pub min_combined_score: Option<f32>,

    /// BM25 parameters used when a BM25 index is built from this config.
    pub bm25: Bm25Params,

    /// Crawler bounds.
    pub crawler: CrawlerConfig,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            chunk_overlap: 30,
            retrieval_count: 3,
            similarity_threshold: None,
            hybrid_search_enabled: false,
            vector_weight: 0.9,
            min_combined_score: Some(0.75),
            bm25: Bm25Params::default(),
            crawler: CrawlerConfig::default(),
        }
    }
}

impl KnowledgeConfig {
    /// Set chunking dimensions.
    pub fn with_chunking(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_overlap = chunk_overlap;
        self
    }

    /// Set the default result count.
    pub fn with_retrieval_count(mut self, n: usize) -> Self {
        self.retrieval_count = n.max(1);
        self
    }

    /// Set or clear the vector-distance quality gate.
    pub fn with_similarity_threshold(mut self, threshold: Option<f32>) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Enable hybrid search with the given fusion weight.
    pub fn with_hybrid_search(mut self, vector_weight: f32) -> Self {
        self.hybrid_search_enabled = true;
        self.vector_weight = vector_weight.clamp(0.0, 1.0);
        self
    }

    /// Set or clear the post-fusion score cutoff.
    pub fn with_min_combined_score(mut self, cutoff: Option<f32>) -> Self {
        self.min_combined_score = cutoff;
        self
    }

    /// Set BM25 parameters.
    pub fn with_bm25(mut self, params: Bm25Params) -> Self {
        self.bm25 = params;
        self
    }

    /// Set crawler bounds.
    pub fn with_crawler(mut self, crawler: CrawlerConfig) -> Self {
        self.crawler = crawler;
        self
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(KnowledgeError::Config(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(KnowledgeError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&self.vector_weight) {
            return Err(KnowledgeError::Config(format!(
                "vector_weight must be between 0.0 and 1.0, got {}",
                self.vector_weight
            )));
        }
        Bm25Params::new(self.bm25.k1, self.bm25.b)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(KnowledgeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let config = KnowledgeConfig::default().with_chunking(100, 100);
        assert!(config.validate().is_err());

        let config = KnowledgeConfig::default().with_chunking(100, 99);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bm25_params_bounds() {
        assert!(Bm25Params::new(0.0, 0.5).is_err());
        assert!(Bm25Params::new(-1.0, 0.5).is_err());
        assert!(Bm25Params::new(1.5, 1.1).is_err());
        assert!(Bm25Params::new(1.5, 0.75).is_ok());
    }

    #[test]
    fn test_vector_weight_clamped() {
        let config = KnowledgeConfig::default().with_hybrid_search(1.5);
        assert_eq!(config.vector_weight, 1.0);
    }
}
