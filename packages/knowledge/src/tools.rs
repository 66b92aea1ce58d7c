//! Plain-text tool surface for tool-calling runtimes.
//!
//! Five tools over the knowledge service. Every tool renders a plain-text
//! reply; operational failures become readable error lines rather than
//! protocol errors, and only an unknown tool name surfaces as an error.

use serde_json::Value;
use tracing::warn;

use crate::crawl::PageSource;
use crate::embedding::EmbeddingProvider;
use crate::error::{KnowledgeError, Result};
use crate::service::KnowledgeService;

const NO_RESULTS: &str = "No matching information found.";

/// Dispatch a tool call by name with JSON arguments.
pub async fn handle_tool<E, P>(
    service: &KnowledgeService<E, P>,
    name: &str,
    args: &Value,
) -> Result<String>
where
    E: EmbeddingProvider,
    P: PageSource,
{
    let str_arg = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or_default();

    match name {
        "rag_search" => {
            let n_results = args
                .get("n_results")
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .unwrap_or_else(|| service.retrieval_count());
            Ok(rag_search(service, str_arg("query"), n_results).await)
        }
        "rag_add" => Ok(rag_add(service, str_arg("url")).await),
        "rag_crawl" => Ok(rag_crawl(service, str_arg("url"), str_arg("pattern")).await),
        "rag_delete" => Ok(rag_delete(service, str_arg("url")).await),
        "rag_stats" => Ok(rag_stats(service)),
        other => Err(KnowledgeError::ToolNotFound(other.to_string())),
    }
}

/// Search both engines and render the two labeled sections.
pub async fn rag_search<E, P>(
    service: &KnowledgeService<E, P>,
    query: &str,
    n_results: usize,
) -> String
where
    E: EmbeddingProvider,
    P: PageSource,
{
    let vector_hits = match service.vector_search(query, n_results).await {
        Ok(hits) => hits,
        Err(e) => {
            warn!(error = %e, "vector search failed");
            return format!("Error: search failed ({e})");
        }
    };
    let bm25_hits = service.bm25_search(query, n_results).await;

    if vector_hits.is_empty() && bm25_hits.is_empty() {
        return NO_RESULTS.to_string();
    }

    let mut sections: Vec<String> = Vec::new();
    let mut emitted: Vec<(String, usize)> = Vec::new();

    let mut vector_section = vec!["## Vector search results (semantic)".to_string()];
    for (i, hit) in vector_hits.iter().enumerate() {
        vector_section.push(format!(
            "### Result {} [distance={:.3}]\nSource: {}\n{}",
            i + 1,
            hit.distance,
            hit.source_url,
            hit.text
        ));
        emitted.push((hit.source_url.clone(), i + 1));
    }
    if vector_hits.is_empty() {
        vector_section.push(NO_RESULTS.to_string());
    }
    sections.push(vector_section.join("\n\n"));

    let mut bm25_section = vec!["## BM25 search results (keyword)".to_string()];
    for (i, (hit, source)) in bm25_hits.iter().enumerate() {
        let source_url = source.clone().unwrap_or_default();
        let body = match emitted.iter().find(|(url, _)| *url == source_url) {
            Some((_, vector_rank)) if !source_url.is_empty() => {
                format!("(see Vector Result {vector_rank})")
            }
            _ => hit.text.clone(),
        };
        bm25_section.push(format!(
            "### Result {} [score={:.3}]\nSource: {}\n{}",
            i + 1,
            hit.score,
            source_url,
            body
        ));
    }
    if bm25_hits.is_empty() {
        bm25_section.push(NO_RESULTS.to_string());
    }
    sections.push(bm25_section.join("\n\n"));

    sections.join("\n\n")
}

/// Ingest one page.
pub async fn rag_add<E, P>(service: &KnowledgeService<E, P>, url: &str) -> String
where
    E: EmbeddingProvider,
    P: PageSource,
{
    match service.ingest_page(url).await {
        Ok(0) => format!("Error: failed to ingest page: {url}"),
        Ok(chunks) => format!("Ingested page: {url} ({chunks} chunks)"),
        Err(e) => format!("Error: {e}"),
    }
}

/// Crawl an index page and ingest its links.
pub async fn rag_crawl<E, P>(service: &KnowledgeService<E, P>, url: &str, pattern: &str) -> String
where
    E: EmbeddingProvider,
    P: PageSource,
{
    let pattern = (!pattern.is_empty()).then_some(pattern);
    match service.ingest_from_index(url, pattern, None).await {
        Ok(report) => format!(
            "Done: {} pages / {} chunks / errors: {} / unsafe: {}",
            report.pages_crawled, report.chunks_stored, report.errors, report.unsafe_urls
        ),
        Err(e) => format!("Error: {e}"),
    }
}

/// Delete everything stored for a source URL.
pub async fn rag_delete<E, P>(service: &KnowledgeService<E, P>, url: &str) -> String
where
    E: EmbeddingProvider,
    P: PageSource,
{
    match service.delete_source(url).await {
        Ok(0) => format!("No matching source found: {url}"),
        Ok(count) => format!("Deleted: {url} ({count} chunks)"),
        Err(e) => format!("Error: {e}"),
    }
}

/// Render store counters.
pub fn rag_stats<E, P>(service: &KnowledgeService<E, P>) -> String
where
    E: EmbeddingProvider,
    P: PageSource,
{
    let stats = service.get_stats();
    format!(
        "Knowledge base stats:\n  total chunks: {}\n  source URLs: {}",
        stats.total_chunks, stats.source_count
    )
}
