//! Dual indexes: dense vectors and sparse BM25 keywords.

pub mod bm25;
pub mod tokenize;
pub mod vector;

pub use bm25::{Bm25Hit, Bm25Index};
pub use tokenize::{SimpleTokenizer, Tokenize, Tokenizer};
pub use vector::{cosine_similarity, IndexStats, VectorHit, VectorStore};
