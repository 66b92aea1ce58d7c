//! Service construction shared by the subcommands.

use std::sync::Arc;

use anyhow::{Context, Result};

use knowledge::testing::StaticPages;
use knowledge::{
    Bm25Index, Bm25Params, Embedder, HashEmbedding, HttpEmbedding, KnowledgeConfig,
    KnowledgeService, VectorStore,
};

use crate::RetrievalArgs;

/// A service wired to persisted indexes and no network page source.
pub type OfflineService = KnowledgeService<Embedder, StaticPages>;

pub fn build_embedder(args: &RetrievalArgs) -> Embedder {
    match &args.embedding_endpoint {
        Some(endpoint) => {
            let mut provider = HttpEmbedding::new(
                endpoint.clone(),
                args.embedding_api_key.clone(),
                args.embedding_model.clone(),
            );
            if args.embedding_prefix {
                provider = provider.with_task_prefixes();
            }
            Embedder::Http(provider)
        }
        None => Embedder::Hash(HashEmbedding::default()),
    }
}

pub struct ServiceOptions {
    pub threshold: Option<f32>,
    pub hybrid: bool,
    pub vector_weight: f32,
    pub min_combined_score: Option<f32>,
    pub n_results: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            threshold: None,
            hybrid: true,
            vector_weight: 0.9,
            min_combined_score: None,
            n_results: 5,
        }
    }
}

/// Build a service over the persisted vector store and BM25 index.
pub fn build_service(args: &RetrievalArgs, options: ServiceOptions) -> Result<OfflineService> {
    let bm25_params =
        Bm25Params::new(args.bm25_k1, args.bm25_b).context("invalid BM25 parameters")?;

    let mut config = KnowledgeConfig::default()
        .with_chunking(args.chunk_size, args.chunk_overlap)
        .with_retrieval_count(options.n_results)
        .with_similarity_threshold(options.threshold)
        .with_min_combined_score(options.min_combined_score)
        .with_bm25(bm25_params);
    if options.hybrid {
        config = config.with_hybrid_search(options.vector_weight);
    }

    let vector = VectorStore::with_persistence(build_embedder(args), args.persist_dir.clone());
    let bm25 = Arc::new(Bm25Index::new(
        bm25_params,
        Some(args.bm25_persist_dir.clone()),
    ));

    let service = KnowledgeService::new(config, vector, StaticPages::new())
        .context("failed to build knowledge service")?
        .with_bm25(bm25);
    Ok(service)
}
