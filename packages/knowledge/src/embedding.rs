//! Embedding providers.
//!
//! The engine only depends on [`EmbeddingProvider`]; real embeddings come
//! from an OpenAI-compatible `/embeddings` endpoint (LM Studio, OpenAI),
//! and tests use the deterministic [`HashEmbedding`].

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{KnowledgeError, Result};

/// Task prefix some models require in front of indexed documents.
const DOCUMENT_PREFIX: &str = "search_document: ";
/// Task prefix for the query side of asymmetric models.
const QUERY_PREFIX: &str = "search_query: ";

/// Turns text into fixed-dimension vectors.
///
/// Documents and queries embed through separate methods because some
/// models require an asymmetric task prefix on each side.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of documents.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// OpenAI-compatible embeddings client.
pub struct HttpEmbedding {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    prefix_enabled: bool,
}

impl HttpEmbedding {
    /// Create a client for `{base_url}/embeddings`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: SecretString::from(api_key.into()),
            model: model.into(),
            prefix_enabled: false,
        }
    }

    /// Enable the `search_document:` / `search_query:` task prefixes.
    pub fn with_task_prefixes(mut self) -> Self {
        self.prefix_enabled = true;
        self
    }

    async fn request(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingsRequest {
            model: &self.model,
            input,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| KnowledgeError::Embedding(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KnowledgeError::Embedding(format!(
                "embeddings endpoint returned {status}"
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| KnowledgeError::Embedding(format!("invalid response: {e}")))?;

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedding {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let input: Vec<String> = texts
            .iter()
            .map(|t| {
                if self.prefix_enabled {
                    format!("{DOCUMENT_PREFIX}{t}")
                } else {
                    t.clone()
                }
            })
            .collect();
        self.request(input).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let input = if self.prefix_enabled {
            format!("{QUERY_PREFIX}{text}")
        } else {
            text.to_string()
        };
        let mut vectors = self.request(vec![input]).await?;
        vectors
            .pop()
            .ok_or_else(|| KnowledgeError::Embedding("empty embeddings response".to_string()))
    }
}

/// Deterministic bag-of-tokens embedding for tests and offline fixtures.
///
/// Each token hashes into one of `dim` buckets; the count vector is
/// L2-normalized, so shared vocabulary yields positive cosine similarity.
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dim: usize,
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

impl HashEmbedding {
    /// Create an embedder with the given dimensionality.
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text
            .to_lowercase()
            .split(|c: char| c.is_whitespace() || c.is_ascii_punctuation() || "、。！？・「」（）".contains(c))
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes(digest[..8].try_into().unwrap()) as usize % self.dim;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_one(text))
    }
}

/// The known providers as one tagged type, so binaries can pick a
/// provider at runtime without trait objects.
pub enum Embedder {
    /// OpenAI-compatible HTTP endpoint.
    Http(HttpEmbedding),
    /// Deterministic offline embedding (tests, fixtures).
    Hash(HashEmbedding),
}

#[async_trait]
impl EmbeddingProvider for Embedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match self {
            Embedder::Http(p) => p.embed_documents(texts).await,
            Embedder::Hash(p) => p.embed_documents(texts).await,
        }
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        match self {
            Embedder::Http(p) => p.embed_query(text).await,
            Embedder::Hash(p) => p.embed_query(text).await,
        }
    }
}
