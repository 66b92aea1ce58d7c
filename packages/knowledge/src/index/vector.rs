//! Embedding-backed vector store with cosine distance.
//!
//! Records are keyed by deterministic chunk id, so re-adding a chunk is an
//! upsert. Writers serialize behind the `RwLock`; readers take snapshots
//! concurrently. Embedding calls always happen before the lock is taken.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::RwLock;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::types::Chunk;

const RECORDS_FILENAME: &str = "records.json";

/// A stored (chunk, embedding) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// One semantic hit. `distance` is cosine distance: 0 identical, 2 opposite.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub text: String,
    pub source_url: String,
    pub chunk_index: usize,
    pub title: String,
    pub crawled_at: String,
    pub distance: f32,
}

/// Store-level counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub source_count: usize,
}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Vector store over a pluggable embedding provider.
pub struct VectorStore<E> {
    embedder: E,
    records: RwLock<IndexMap<String, VectorRecord>>,
    persist_dir: Option<PathBuf>,
}

impl<E: EmbeddingProvider> VectorStore<E> {
    /// In-memory store.
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            records: RwLock::new(IndexMap::new()),
            persist_dir: None,
        }
    }

    /// Store persisting to `<dir>/records.json`; existing records load now.
    pub fn with_persistence(embedder: E, dir: PathBuf) -> Self {
        let store = Self {
            embedder,
            records: RwLock::new(IndexMap::new()),
            persist_dir: Some(dir),
        };
        store.load();
        store
    }

    /// Embed and upsert chunks, keyed by chunk id. Returns the number of
    /// chunks written.
    pub async fn add_documents(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_documents(&texts).await?;

        {
            let mut records = self.records.write().unwrap();
            for (chunk, embedding) in chunks.iter().zip(embeddings) {
                records.insert(
                    chunk.id.clone(),
                    VectorRecord {
                        chunk: chunk.clone(),
                        embedding,
                    },
                );
            }
        }

        info!(count = chunks.len(), "upserted documents into vector store");
        self.persist().await;
        Ok(chunks.len())
    }

    /// Top-k nearest chunks by cosine distance (ascending). When
    /// `similarity_threshold` is set, records with a larger distance are
    /// dropped before the cut to k.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        similarity_threshold: Option<f32>,
    ) -> Result<Vec<VectorHit>> {
        let query_embedding = self.embedder.embed_query(query).await?;

        let records = self.records.read().unwrap();
        let mut hits: Vec<VectorHit> = records
            .values()
            .map(|record| {
                let distance = 1.0 - cosine_similarity(&query_embedding, &record.embedding);
                VectorHit {
                    id: record.chunk.id.clone(),
                    text: record.chunk.text.clone(),
                    source_url: record.chunk.source_url.clone(),
                    chunk_index: record.chunk.chunk_index,
                    title: record.chunk.title.clone(),
                    crawled_at: record.chunk.crawled_at.clone(),
                    distance,
                }
            })
            .filter(|hit| similarity_threshold.is_none_or(|t| hit.distance <= t))
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Remove every record for a source URL. Returns the count removed.
    pub async fn delete_by_source(&self, source_url: &str) -> usize {
        let count = {
            let mut records = self.records.write().unwrap();
            let before = records.len();
            records.retain(|_, record| record.chunk.source_url != source_url);
            before - records.len()
        };

        if count > 0 {
            info!(count, source_url, "deleted documents from vector store");
            self.persist().await;
        }
        count
    }

    /// Remove records for `source_url` whose id is not in `keep_ids`.
    ///
    /// Runs right after an upsert during re-ingestion so a page that now
    /// produces fewer chunks sheds its orphans.
    pub async fn delete_stale_chunks(&self, source_url: &str, keep_ids: &HashSet<String>) -> usize {
        let count = {
            let mut records = self.records.write().unwrap();
            let before = records.len();
            records.retain(|id, record| {
                record.chunk.source_url != source_url || keep_ids.contains(id)
            });
            before - records.len()
        };

        if count > 0 {
            info!(count, source_url, "deleted stale chunks from vector store");
            self.persist().await;
        }
        count
    }

    /// Chunk and distinct-source counters. Walks all records.
    pub fn stats(&self) -> IndexStats {
        let records = self.records.read().unwrap();
        let sources: HashSet<&str> = records
            .values()
            .map(|r| r.chunk.source_url.as_str())
            .collect();
        IndexStats {
            total_chunks: records.len(),
            source_count: sources.len(),
        }
    }

    /// Serialize under the read lock, write on a blocking thread, swap in
    /// with a rename so readers never observe a torn file.
    async fn persist(&self) {
        let Some(dir) = &self.persist_dir else {
            return;
        };

        let payload = {
            let records = self.records.read().unwrap();
            let all: Vec<&VectorRecord> = records.values().collect();
            match serde_json::to_vec(&all) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "failed to serialize vector store");
                    return;
                }
            }
        };

        let dir = dir.clone();
        let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&dir)?;
            let tmp = dir.join(format!("{RECORDS_FILENAME}.tmp"));
            std::fs::write(&tmp, &payload)?;
            std::fs::rename(&tmp, dir.join(RECORDS_FILENAME))?;
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => debug!("vector store persisted"),
            Ok(Err(e)) => warn!(error = %e, "failed to persist vector store"),
            Err(e) => warn!(error = %e, "vector store persistence task failed"),
        }
    }

    fn load(&self) {
        let Some(dir) = &self.persist_dir else {
            return;
        };
        let path = dir.join(RECORDS_FILENAME);
        if !path.exists() {
            return;
        }

        match std::fs::read(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                serde_json::from_slice::<Vec<VectorRecord>>(&raw).map_err(|e| e.to_string())
            }) {
            Ok(loaded) => {
                let mut records = self.records.write().unwrap();
                for record in loaded {
                    records.insert(record.chunk.id.clone(), record);
                }
                info!(path = %path.display(), count = records.len(), "vector store loaded");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable vector store file, starting empty");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::types::{chunk_id, CrawledPage};

    fn chunk(url: &str, index: usize, text: &str) -> Chunk {
        let page = CrawledPage::new(url, "Title", text);
        Chunk::from_page(&page, index, text)
    }

    fn store() -> VectorStore<HashEmbedding> {
        VectorStore::new(HashEmbedding::default())
    }

    #[test]
    fn test_cosine_similarity_basics() {
        let a = [1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn test_upsert_and_search() {
        let store = store();
        store
            .add_documents(&[
                chunk("https://ex.com/a", 0, "Python is a programming language"),
                chunk("https://ex.com/b", 0, "The weather is sunny today"),
            ])
            .await
            .unwrap();

        let hits = store.search("Python language", 5, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source_url, "https://ex.com/a");
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn test_upsert_same_id_does_not_duplicate() {
        let store = store();
        let c = chunk("https://ex.com/a", 0, "first version");
        store.add_documents(std::slice::from_ref(&c)).await.unwrap();
        let c2 = chunk("https://ex.com/a", 0, "second version");
        store.add_documents(std::slice::from_ref(&c2)).await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.total_chunks, 1);
        let hits = store.search("version", 5, None).await.unwrap();
        assert_eq!(hits[0].text, "second version");
    }

    #[tokio::test]
    async fn test_threshold_filters_before_cut() {
        let store = store();
        store
            .add_documents(&[chunk("https://ex.com/a", 0, "completely unrelated topic")])
            .await
            .unwrap();

        let hits = store
            .search("quantum chromodynamics", 5, Some(0.5))
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.distance <= 0.5));
    }

    #[tokio::test]
    async fn test_delete_by_source() {
        let store = store();
        store
            .add_documents(&[
                chunk("https://ex.com/a", 0, "alpha"),
                chunk("https://ex.com/a", 1, "beta"),
                chunk("https://ex.com/b", 0, "gamma"),
            ])
            .await
            .unwrap();

        assert_eq!(store.delete_by_source("https://ex.com/a").await, 2);
        let stats = store.stats();
        assert_eq!(stats.total_chunks, 1);
        assert_eq!(stats.source_count, 1);
    }

    #[tokio::test]
    async fn test_delete_stale_chunks() {
        let store = store();
        store
            .add_documents(&[
                chunk("https://ex.com/a", 0, "zero"),
                chunk("https://ex.com/a", 1, "one"),
                chunk("https://ex.com/a", 2, "two"),
            ])
            .await
            .unwrap();

        let keep: HashSet<String> = [chunk_id("https://ex.com/a", 0)].into_iter().collect();
        assert_eq!(store.delete_stale_chunks("https://ex.com/a", &keep).await, 2);
        assert_eq!(store.stats().total_chunks, 1);
    }

    #[tokio::test]
    async fn test_stats_counts_distinct_sources() {
        let store = store();
        store
            .add_documents(&[
                chunk("https://ex.com/a", 0, "a0"),
                chunk("https://ex.com/a", 1, "a1"),
                chunk("https://ex.com/b", 0, "b0"),
            ])
            .await
            .unwrap();

        let stats = store.stats();
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.source_count, 2);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("vectors");

        let store = VectorStore::with_persistence(HashEmbedding::default(), dir.clone());
        store
            .add_documents(&[chunk("https://ex.com/a", 0, "persisted content")])
            .await
            .unwrap();
        drop(store);

        let reloaded = VectorStore::with_persistence(HashEmbedding::default(), dir);
        assert_eq!(reloaded.stats().total_chunks, 1);
        let hits = reloaded.search("persisted", 5, None).await.unwrap();
        assert_eq!(hits[0].source_url, "https://ex.com/a");
    }
}
