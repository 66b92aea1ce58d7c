//! Service-level tests over fixture pages: ingest, re-ingest
//! reconciliation, and hybrid vs vector-only retrieval behavior.

use std::sync::Arc;

use knowledge::testing::StaticPages;
use knowledge::{
    Bm25Index, Bm25Params, HashEmbedding, KnowledgeConfig, KnowledgeService, VectorStore,
};

fn vector_only_service(
    pages: StaticPages,
    similarity_threshold: Option<f32>,
) -> KnowledgeService<HashEmbedding, StaticPages> {
    let config = KnowledgeConfig::default()
        .with_chunking(200, 0)
        .with_similarity_threshold(similarity_threshold)
        .with_min_combined_score(None);
    KnowledgeService::new(config, VectorStore::new(HashEmbedding::default()), pages).unwrap()
}

fn hybrid_service(
    pages: StaticPages,
    similarity_threshold: Option<f32>,
    vector_weight: f32,
) -> KnowledgeService<HashEmbedding, StaticPages> {
    let config = KnowledgeConfig::default()
        .with_chunking(200, 0)
        .with_similarity_threshold(similarity_threshold)
        .with_hybrid_search(vector_weight)
        .with_min_combined_score(None);
    KnowledgeService::new(config, VectorStore::new(HashEmbedding::default()), pages)
        .unwrap()
        .with_bm25(Arc::new(Bm25Index::new(Bm25Params::default(), None)))
}

#[tokio::test]
async fn test_ingest_and_retrieve_single_page() {
    let pages = StaticPages::new().with_page(
        "https://ex.com/a",
        "Python",
        "Python is a programming language. It is widely used.",
    );
    let service = vector_only_service(pages, None);

    let chunks = service.ingest_page("https://ex.com/a").await.unwrap();
    assert_eq!(chunks, 1);

    let result = service.retrieve("Python", 5).await.unwrap();
    assert_eq!(result.sources, vec!["https://ex.com/a"]);
    assert!(result.context.contains("Source: https://ex.com/a"));
    assert!(result.context.contains("--- Reference 1 ---"));
}

#[tokio::test]
async fn test_reingest_shrinking_reconciles_stale_chunks() {
    // Three paragraphs over the 200-char bound produce three chunks.
    let long_text = format!(
        "{}\n\n{}\n\n{}",
        "first paragraph ".repeat(10).trim(),
        "second paragraph ".repeat(10).trim(),
        "third paragraph ".repeat(10).trim()
    );
    let pages = StaticPages::new().with_page("https://ex.com/u", "U", long_text);
    let service = vector_only_service(pages, None);

    let first = service.ingest_page("https://ex.com/u").await.unwrap();
    assert_eq!(first, 3);
    assert_eq!(service.get_stats().total_chunks, 3);

    // Re-ingest the same URL with much less content.
    let shrunk = StaticPages::new().with_page("https://ex.com/u", "U", "Only one chunk now.");
    let service2 = KnowledgeService::new(
        KnowledgeConfig::default().with_chunking(200, 0),
        reuse_vector_store(service),
        shrunk,
    )
    .unwrap();

    let second = service2.ingest_page("https://ex.com/u").await.unwrap();
    assert_eq!(second, 1);
    assert_eq!(service2.get_stats().total_chunks, 1);
}

// The service owns its stores, so handing the vector store to a second
// service stands in for "the same deployment saw a new crawl".
fn reuse_vector_store(
    service: KnowledgeService<HashEmbedding, StaticPages>,
) -> VectorStore<HashEmbedding> {
    service.into_vector_store()
}

#[tokio::test]
async fn test_empty_page_does_not_erase_existing_chunks() {
    let pages = StaticPages::new()
        .with_page("https://ex.com/a", "A", "Useful content about retrieval engines.");
    let service = vector_only_service(pages, None);
    service.ingest_page("https://ex.com/a").await.unwrap();
    assert_eq!(service.get_stats().total_chunks, 1);

    let empty = StaticPages::new().with_page("https://ex.com/a", "A", "   ");
    let service2 = KnowledgeService::new(
        KnowledgeConfig::default().with_chunking(200, 0),
        reuse_vector_store(service),
        empty,
    )
    .unwrap();

    let count = service2.ingest_page("https://ex.com/a").await.unwrap();
    assert_eq!(count, 0);
    assert_eq!(service2.get_stats().total_chunks, 1);
}

#[tokio::test]
async fn test_crawl_failure_returns_zero() {
    let service = vector_only_service(StaticPages::new(), None);
    let count = service.ingest_page("https://ex.com/missing").await.unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_invalid_url_is_an_error() {
    let service = vector_only_service(StaticPages::new(), None);
    assert!(service.ingest_page("ftp://ex.com/x").await.is_err());
}

#[tokio::test]
async fn test_hybrid_rescues_exact_keyword_match() {
    // A rare token inside a numeric table: the bag-of-words embedding
    // leaves it semantically distant, but BM25 matches it exactly.
    let table = "| 名前 | 値1 | 値2 |\n|---|---|---|\n| フロベニウスノルム | 140 | 75 |\n| スペクトルノルム | 500 | 255 |";
    let pages = StaticPages::new().with_page("https://ex.com/norms", "Norms", table);

    // Vector-only with a tight distance gate finds nothing.
    let strict = vector_only_service(
        StaticPages::new().with_page("https://ex.com/norms", "Norms", table),
        Some(0.5),
    );
    strict.ingest_page("https://ex.com/norms").await.unwrap();
    let vector_only = strict.retrieve("フロベニウスノルム", 5).await.unwrap();
    assert!(vector_only.sources.is_empty());

    // Hybrid without the gate returns the page on keyword strength.
    let hybrid = hybrid_service(pages, None, 0.5);
    hybrid.ingest_page("https://ex.com/norms").await.unwrap();
    let result = hybrid.retrieve("フロベニウスノルム", 5).await.unwrap();
    assert_eq!(result.sources, vec!["https://ex.com/norms"]);
    assert!(result.context.contains("フロベニウスノルム"));
}

#[tokio::test]
async fn test_quality_gate_excludes_bm25_only_noise() {
    // The page shares the exact keyword but nothing else with the query,
    // so its vector distance exceeds the gate while BM25 scores high.
    let noise = "irrelevant filler lines\nフロベニウスノルム\nmore filler noise entirely";
    let query = "機械学習 モデル 訓練 データ フロベニウスノルム 行列 計算 手法";

    let hybrid = hybrid_service(
        StaticPages::new().with_page("https://ex.com/noise", "Noise", noise),
        Some(0.3),
        0.5,
    );
    hybrid.ingest_page("https://ex.com/noise").await.unwrap();
    let result = hybrid.retrieve(query, 5).await.unwrap();
    assert!(result.sources.is_empty(), "gate should drop BM25-only hit");

    let strict = vector_only_service(
        StaticPages::new().with_page("https://ex.com/noise", "Noise", noise),
        Some(0.3),
    );
    strict.ingest_page("https://ex.com/noise").await.unwrap();
    let vector_only = strict.retrieve(query, 5).await.unwrap();
    assert!(vector_only.sources.is_empty());
}

#[tokio::test]
async fn test_delete_source_clears_both_engines() {
    let pages = StaticPages::new()
        .with_page("https://ex.com/a", "A", "Content about search engines.")
        .with_page("https://ex.com/b", "B", "Content about web crawlers.");
    let service = hybrid_service(pages, None, 0.5);

    service.ingest_page("https://ex.com/a").await.unwrap();
    service.ingest_page("https://ex.com/b").await.unwrap();
    assert_eq!(service.get_stats().source_count, 2);

    let deleted = service.delete_source("https://ex.com/a").await.unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(service.get_stats().source_count, 1);

    let result = service.retrieve("search engines", 5).await.unwrap();
    assert!(!result.sources.contains(&"https://ex.com/a".to_string()));
}

#[tokio::test]
async fn test_ingest_from_index_isolates_failures() {
    let pages = StaticPages::new()
        .with_page("https://ex.com/ok1", "One", "First page body text.")
        .with_page("https://ex.com/ok2", "Two", "Second page body text.")
        .with_index_links(vec![
            "https://ex.com/ok1".to_string(),
            "https://ex.com/ok2".to_string(),
            "https://ex.com/broken".to_string(),
        ]);
    let service = vector_only_service(pages, None);

    let report = service
        .ingest_from_index("https://ex.com/index", None, None)
        .await
        .unwrap();

    assert_eq!(report.pages_crawled, 2);
    assert_eq!(report.chunks_stored, 2);
    assert_eq!(report.errors, 1);
    assert_eq!(report.unsafe_urls, 0);
}

#[tokio::test]
async fn test_ingest_from_index_reports_progress() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let pages = StaticPages::new()
        .with_page("https://ex.com/1", "1", "Page one body.")
        .with_page("https://ex.com/2", "2", "Page two body.")
        .with_index_links(vec![
            "https://ex.com/1".to_string(),
            "https://ex.com/2".to_string(),
        ]);
    let service = vector_only_service(pages, None);

    let calls = AtomicUsize::new(0);
    let callback = |done: usize, total: usize| {
        assert!(done <= total);
        assert_eq!(total, 2);
        calls.fetch_add(1, Ordering::SeqCst);
    };

    service
        .ingest_from_index("https://ex.com/index", None, Some(&callback))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancelled_batch_ingest_returns_cancelled() {
    use knowledge::KnowledgeError;
    use tokio_util::sync::CancellationToken;

    let pages = StaticPages::new()
        .with_page("https://ex.com/1", "1", "Page body.")
        .with_index_links(vec!["https://ex.com/1".to_string()]);
    let service = vector_only_service(pages, None);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = service
        .ingest_from_index_with_cancel("https://ex.com/index", None, None, cancel)
        .await;
    assert!(matches!(result, Err(KnowledgeError::Cancelled)));
}

#[tokio::test]
async fn test_retrieve_observes_prior_ingest() {
    let pages = StaticPages::new().with_page(
        "https://ex.com/fresh",
        "Fresh",
        "Brand new page about incremental indexing.",
    );
    let service = vector_only_service(pages, None);

    assert!(service.retrieve("incremental indexing", 3).await.unwrap().sources.is_empty());
    service.ingest_page("https://ex.com/fresh").await.unwrap();
    let result = service.retrieve("incremental indexing", 3).await.unwrap();
    assert_eq!(result.sources, vec!["https://ex.com/fresh"]);
}
