//! # Knowledge Engine
//!
//! A hybrid retrieval-augmented knowledge engine: ingest arbitrary web
//! pages, chunk them by structural shape, index every chunk in both a
//! dense vector store and a sparse BM25 keyword index, and answer queries
//! by fusing the two rankings.
//!
//! ## Architecture
//!
//! ```text
//! INGEST:  URL Guard → robots.txt → Crawler → extract → classify →
//!          chunk → embed → VectorStore upsert → stale reconcile →
//!          BM25 add (best-effort)
//!
//! QUERY:   KnowledgeService.retrieve →
//!            VectorStore.search  ─┐
//!            Bm25Index.search    ─┤→ normalize → convex combination →
//!                                 │  quality gate → ordered results
//!
//! EVALUATE: dataset → retrieve per query → precision/recall/F1,
//!           NDCG, MRR → baseline regression check
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use knowledge::{
//!     Bm25Index, KnowledgeConfig, KnowledgeService, VectorStore, WebCrawler,
//! };
//! use knowledge::embedding::HttpEmbedding;
//!
//! let config = KnowledgeConfig::default().with_hybrid_search(0.9);
//! let embedder = HttpEmbedding::new("http://localhost:1234/v1", "lm-studio", "nomic-embed-text")
//!     .with_task_prefixes();
//! let vector = VectorStore::with_persistence(embedder, "./knowledge_db".into());
//! let bm25 = Arc::new(Bm25Index::new(config.bm25, Some("./bm25_index".into())));
//! let crawler = WebCrawler::new(config.crawler.clone())?;
//!
//! let service = KnowledgeService::new(config, vector, crawler)?.with_bm25(bm25);
//!
//! service.ingest_page("https://example.com/docs").await?;
//! let result = service.retrieve("how do I configure retries", 5).await?;
//! println!("{}", result.context);
//! ```
//!
//! ## Modules
//!
//! - [`crawl`] - SSRF-guarded crawling with robots.txt and per-host pacing
//! - [`chunk`] - content classification and the prose/heading/table chunkers
//! - [`embedding`] - the embedding-provider seam
//! - [`index`] - the vector store and the persistent BM25 index
//! - [`search`] - score normalization and hybrid fusion
//! - [`service`] - the orchestrating knowledge service
//! - [`safety`] - optional URL safety checking
//! - [`eval`] - the evaluation harness with regression detection
//! - [`tools`] - the plain-text tool surface
//! - [`testing`] - fixture-backed doubles for offline tests

pub mod chunk;
pub mod config;
pub mod crawl;
pub mod embedding;
pub mod error;
pub mod eval;
pub mod index;
pub mod safety;
pub mod search;
pub mod service;
pub mod testing;
pub mod tools;
pub mod types;

pub use config::{Bm25Params, CrawlerConfig, KnowledgeConfig, USER_AGENT};
pub use crawl::{PageSource, RobotsTxt, UrlGuard, WebCrawler};
pub use embedding::{Embedder, EmbeddingProvider, HashEmbedding, HttpEmbedding};
pub use error::{CrawlError, KnowledgeError, Result, SecurityError};
pub use index::{Bm25Hit, Bm25Index, IndexStats, VectorHit, VectorStore};
pub use search::{HybridHit, HybridRanker};
pub use service::{IngestReport, KnowledgeService, ProgressCallback, RetrievedContext};
pub use types::{chunk_id, Chunk, CrawledPage};
