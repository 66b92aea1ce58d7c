//! Knowledge service: the single owner of both indexes.
//!
//! All writes to the vector store and the BM25 index flow through this
//! service, which keeps the two consistent: a page's chunks upsert into
//! the vector store, stale ids are reconciled immediately after, and the
//! BM25 add is best-effort (a keyword-index failure never loses the
//! vector-side result).

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use crate::chunk::smart_chunk;
use crate::config::KnowledgeConfig;
use crate::crawl::guard::defragment;
use crate::crawl::PageSource;
use crate::embedding::EmbeddingProvider;
use crate::error::{KnowledgeError, Result};
use crate::index::bm25::{Bm25Hit, Bm25Index};
use crate::index::vector::{IndexStats, VectorHit, VectorStore};
use crate::safety::SafetyCheck;
use crate::search::{fetch_budget, HybridRanker};
use crate::types::{Chunk, CrawledPage};

/// Progress callback for batch ingestion: `(completed, total)`.
pub type ProgressCallback<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// Outcome of `ingest_from_index`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub pages_crawled: usize,
    pub chunks_stored: usize,
    pub errors: usize,
    pub unsafe_urls: usize,
}

/// What `retrieve` hands to the caller: preformatted context plus the
/// unique source URLs in rank order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedContext {
    pub context: String,
    pub sources: Vec<String>,
}

impl RetrievedContext {
    fn empty() -> Self {
        Self {
            context: String::new(),
            sources: Vec::new(),
        }
    }
}

/// Orchestrates crawl → chunk → index → retrieve.
pub struct KnowledgeService<E, P> {
    config: KnowledgeConfig,
    vector: VectorStore<E>,
    bm25: Option<Arc<Bm25Index>>,
    ranker: Option<HybridRanker>,
    crawler: P,
    safety: Option<Arc<dyn SafetyCheck>>,
}

impl<E: EmbeddingProvider, P: PageSource> KnowledgeService<E, P> {
    /// Build a service. Fails when the config is inconsistent.
    pub fn new(config: KnowledgeConfig, vector: VectorStore<E>, crawler: P) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            vector,
            bm25: None,
            ranker: None,
            crawler,
            safety: None,
        })
    }

    /// Attach a BM25 index. Hybrid retrieval activates when the config
    /// also enables it.
    pub fn with_bm25(mut self, bm25: Arc<Bm25Index>) -> Self {
        if self.config.hybrid_search_enabled {
            self.ranker = Some(
                HybridRanker::new(self.config.vector_weight)
                    .with_min_combined_score(self.config.min_combined_score),
            );
            info!("hybrid search engine initialized");
        }
        self.bm25 = Some(bm25);
        self
    }

    /// Attach a URL safety checker.
    pub fn with_safety(mut self, safety: Arc<dyn SafetyCheck>) -> Self {
        self.safety = Some(safety);
        self
    }

    /// Ingest a single page. Returns the number of chunks stored; crawl
    /// failure returns 0, while an invalid or unsafe URL is an error so
    /// the caller can explain the rejection.
    pub async fn ingest_page(&self, url: &str) -> Result<usize> {
        let validated = self.crawler.validate(url).await?;

        if let Some(safety) = &self.safety {
            let verdict = safety.check_url(&validated).await?;
            if !verdict.is_safe {
                warn!(url = %validated, threats = ?verdict.threats, "unsafe URL rejected");
                return Err(KnowledgeError::UnsafeUrl {
                    url: validated,
                    threats: verdict.threats,
                });
            }
        }

        let Some(page) = self.crawler.fetch_page(&validated).await else {
            warn!(url = %validated, "failed to crawl page");
            return Ok(0);
        };

        self.ingest_crawled(&page).await
    }

    /// Chunk and index an already-fetched page.
    ///
    /// Also the entry point for fixture documents that never touch the
    /// network. An empty chunking result leaves existing data untouched.
    pub async fn ingest_crawled(&self, page: &CrawledPage) -> Result<usize> {
        let chunks = smart_chunk(&page.text, self.config.chunk_size, self.config.chunk_overlap);
        if chunks.is_empty() {
            info!(url = %page.url, "no chunks generated for page");
            return Ok(0);
        }

        // Upstream strips fragments; re-apply before deriving chunk ids.
        let normalized_url = defragment(&page.url);
        let normalized_page = CrawledPage {
            url: normalized_url.clone(),
            ..page.clone()
        };

        let document_chunks: Vec<Chunk> = chunks
            .iter()
            .enumerate()
            .map(|(i, text)| Chunk::from_page(&normalized_page, i, text.clone()))
            .collect();
        let new_ids: HashSet<String> = document_chunks.iter().map(|c| c.id.clone()).collect();

        // Upsert first so a later failure can never lose existing data,
        // then reconcile ids that this ingest no longer produces.
        let count = self.vector.add_documents(&document_chunks).await?;
        self.vector
            .delete_stale_chunks(&normalized_url, &new_ids)
            .await;

        if let Some(bm25) = &self.bm25 {
            let docs: Vec<(String, String, String)> = document_chunks
                .iter()
                .map(|c| (c.id.clone(), c.text.clone(), normalized_url.clone()))
                .collect();
            let bm25 = Arc::clone(bm25);
            let result =
                tokio::task::spawn_blocking(move || bm25.add_documents(&docs)).await;
            match result {
                Ok(added) => debug!(added, "documents added to BM25 index"),
                Err(e) => warn!(url = %normalized_url, error = %e, "failed to add documents to BM25 index"),
            }
        }

        info!(url = %normalized_url, chunks = count, "ingested page");
        Ok(count)
    }

    /// Crawl an index page and ingest every linked page.
    ///
    /// Per-page failures are isolated and counted; unsafe URLs are skipped
    /// and counted separately. `progress` is invoked after each page crawl
    /// completes with `(completed, total)`.
    pub async fn ingest_from_index(
        &self,
        index_url: &str,
        pattern: Option<&str>,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<IngestReport> {
        let urls = self.crawler.discover(index_url, pattern).await?;
        if urls.is_empty() {
            warn!(url = %index_url, "no URLs found in index page");
            return Ok(IngestReport::default());
        }

        let (safe_urls, unsafe_urls) = self.filter_unsafe(urls).await?;
        if safe_urls.is_empty() {
            warn!("no safe URLs to crawl after safety check");
            return Ok(IngestReport {
                unsafe_urls,
                ..IngestReport::default()
            });
        }

        let total = safe_urls.len();
        let mut tasks: FuturesUnordered<_> = safe_urls
            .iter()
            .map(|url| self.crawler.fetch_page(url))
            .collect();

        let mut pages: Vec<CrawledPage> = Vec::new();
        let mut completed = 0usize;
        while let Some(result) = tasks.next().await {
            completed += 1;
            if let Some(page) = result {
                pages.push(page);
            }
            if let Some(callback) = progress {
                callback(completed, total);
            }
        }

        let mut errors = total - pages.len();
        let mut chunks_stored = 0usize;
        for page in &pages {
            match self.ingest_crawled(page).await {
                Ok(count) => chunks_stored += count,
                Err(e) => {
                    warn!(url = %page.url, error = %e, "failed to ingest page");
                    errors += 1;
                }
            }
        }

        let report = IngestReport {
            pages_crawled: pages.len(),
            chunks_stored,
            errors,
            unsafe_urls,
        };
        info!(
            pages = report.pages_crawled,
            chunks = report.chunks_stored,
            errors = report.errors,
            unsafe_urls = report.unsafe_urls,
            "ingested from index"
        );
        Ok(report)
    }

    /// `ingest_from_index` with cancellation support. Acquired host slots
    /// and semaphore permits release on cancellation; index persistence is
    /// atomic, so nothing is left half-written.
    pub async fn ingest_from_index_with_cancel(
        &self,
        index_url: &str,
        pattern: Option<&str>,
        progress: Option<ProgressCallback<'_>>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<IngestReport> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(KnowledgeError::Cancelled),
            result = self.ingest_from_index(index_url, pattern, progress) => result,
        }
    }

    async fn filter_unsafe(&self, urls: Vec<String>) -> Result<(Vec<String>, usize)> {
        let Some(safety) = &self.safety else {
            return Ok((urls, 0));
        };

        let verdicts = safety.check_urls(&urls).await?;
        let mut safe = Vec::with_capacity(urls.len());
        let mut unsafe_count = 0usize;
        for url in urls {
            match verdicts.get(&url) {
                Some(v) if !v.is_safe => {
                    warn!(url = %url, threats = ?v.threats, "unsafe URL skipped");
                    unsafe_count += 1;
                }
                _ => safe.push(url),
            }
        }
        if unsafe_count > 0 {
            info!(skipped = unsafe_count, "safety check filtered URLs");
        }
        Ok((safe, unsafe_count))
    }

    /// Retrieve formatted context for a query. Routes through hybrid
    /// search when enabled and a BM25 index is attached, vector-only
    /// otherwise.
    pub async fn retrieve(&self, query: &str, n_results: usize) -> Result<RetrievedContext> {
        match &self.ranker {
            Some(ranker) if self.bm25.is_some() => {
                self.retrieve_hybrid(query, n_results, ranker).await
            }
            _ => self.retrieve_vector_only(query, n_results).await,
        }
    }

    async fn retrieve_vector_only(&self, query: &str, n_results: usize) -> Result<RetrievedContext> {
        let hits = self
            .vector
            .search(query, n_results, self.config.similarity_threshold)
            .await?;
        if hits.is_empty() {
            return Ok(RetrievedContext::empty());
        }

        for (i, hit) in hits.iter().enumerate() {
            debug!(
                rank = i + 1,
                distance = hit.distance,
                source = %hit.source_url,
                "vector retrieval hit"
            );
        }
        Ok(format_context(
            hits.iter().map(|h| (h.source_url.as_str(), h.text.as_str())),
        ))
    }

    async fn retrieve_hybrid(
        &self,
        query: &str,
        n_results: usize,
        ranker: &HybridRanker,
    ) -> Result<RetrievedContext> {
        let budget = fetch_budget(n_results);

        // Threshold filtering is deferred to fusion, where it feeds the
        // quality gate instead of silently shrinking the candidate set.
        let vector_hits = self.vector.search(query, budget, None).await?;
        let bm25_hits = self.bm25_search(query, budget).await;

        let fused = ranker.fuse(
            vector_hits,
            bm25_hits,
            n_results,
            self.config.similarity_threshold,
        );
        if fused.is_empty() {
            return Ok(RetrievedContext::empty());
        }

        for (i, hit) in fused.iter().enumerate() {
            debug!(
                rank = i + 1,
                combined = hit.combined_score,
                distance = ?hit.vector_distance,
                bm25 = ?hit.bm25_score,
                source = %hit.source_url,
                "hybrid retrieval hit"
            );
        }
        Ok(format_context(
            fused.iter().map(|h| (h.source_url.as_str(), h.text.as_str())),
        ))
    }

    /// Raw vector-side candidates (tool surface).
    pub async fn vector_search(&self, query: &str, k: usize) -> Result<Vec<VectorHit>> {
        self.vector.search(query, k, None).await
    }

    /// Raw keyword-side candidates with resolved source URLs (tool surface).
    pub async fn bm25_search(&self, query: &str, k: usize) -> Vec<(Bm25Hit, Option<String>)> {
        let Some(bm25) = &self.bm25 else {
            return Vec::new();
        };
        let bm25 = Arc::clone(bm25);
        let query = query.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let hits = bm25.search(&query, k);
            hits.into_iter()
                .map(|hit| {
                    let source = bm25.source_url(&hit.doc_id);
                    (hit, source)
                })
                .collect::<Vec<_>>()
        })
        .await;

        match result {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "BM25 search task failed");
                Vec::new()
            }
        }
    }

    /// Delete every chunk stored for a source URL from both engines.
    /// Returns the vector-store count.
    pub async fn delete_source(&self, source_url: &str) -> Result<usize> {
        let normalized = defragment(source_url);
        let mut deleted = self.vector.delete_by_source(&normalized).await;

        // Early versions stored fragment-bearing URLs; clean those too.
        let had_fragment = normalized != source_url;
        if had_fragment {
            deleted += self.vector.delete_by_source(source_url).await;
        }

        if let Some(bm25) = &self.bm25 {
            let bm25 = Arc::clone(bm25);
            let normalized = normalized.clone();
            let legacy = had_fragment.then(|| source_url.to_string());
            let result = tokio::task::spawn_blocking(move || {
                let mut count = bm25.delete_by_source(&normalized);
                if let Some(url) = legacy {
                    count += bm25.delete_by_source(&url);
                }
                count
            })
            .await;
            match result {
                Ok(count) => debug!(count, "documents deleted from BM25 index"),
                Err(e) => warn!(error = %e, "failed to delete from BM25 index"),
            }
        }

        info!(deleted, source = %normalized, "deleted source");
        Ok(deleted)
    }

    /// Store counters.
    pub fn get_stats(&self) -> IndexStats {
        self.vector.stats()
    }

    /// The configured default result count for `retrieve`.
    pub fn retrieval_count(&self) -> usize {
        self.config.retrieval_count
    }

    /// Tear down the service, handing back the vector store (e.g. to
    /// rebuild the service against a different page source).
    pub fn into_vector_store(self) -> VectorStore<E> {
        self.vector
    }
}

/// Render ranked `(source_url, text)` pairs into the reference-context
/// format and the deduplicated source list.
fn format_context<'a>(hits: impl Iterator<Item = (&'a str, &'a str)>) -> RetrievedContext {
    let mut parts: Vec<String> = Vec::new();
    let mut sources: Vec<String> = Vec::new();

    for (i, (source_url, text)) in hits.enumerate() {
        let source = if source_url.is_empty() {
            "unknown"
        } else {
            source_url
        };
        parts.push(format!(
            "--- Reference {} ---\nSource: {}\n{}",
            i + 1,
            source,
            text
        ));
        if source != "unknown" && !sources.iter().any(|s| s == source) {
            sources.push(source.to_string());
        }
    }

    RetrievedContext {
        context: parts.join("\n\n"),
        sources,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_context_layout() {
        let result = format_context(
            [
                ("https://ex.com/a", "First chunk."),
                ("https://ex.com/b", "Second chunk."),
                ("https://ex.com/a", "Third chunk."),
            ]
            .into_iter(),
        );

        assert!(result
            .context
            .starts_with("--- Reference 1 ---\nSource: https://ex.com/a\nFirst chunk."));
        assert!(result.context.contains("--- Reference 2 ---"));
        assert_eq!(result.sources, vec!["https://ex.com/a", "https://ex.com/b"]);
    }

    #[test]
    fn test_format_context_empty() {
        let result = format_context(std::iter::empty());
        assert!(result.context.is_empty());
        assert!(result.sources.is_empty());
    }
}
