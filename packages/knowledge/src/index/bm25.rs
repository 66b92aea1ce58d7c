//! Persistent BM25 keyword index.
//!
//! Documents live in an insertion-ordered map; the inverted index is
//! rebuilt lazily on the first search after a write. Persistence writes a
//! `metadata.json` plus a `bm25s/` postings directory into a temp dir and
//! swaps it in with renames, so a crash can never leave a half-written
//! index: on startup a leftover `<dir>_old` is renamed back when the live
//! directory is missing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Bm25Params;
use crate::index::tokenize::Tokenizer;

const METADATA_FILENAME: &str = "metadata.json";
const POSTINGS_SUBDIR: &str = "bm25s";
const POSTINGS_FILENAME: &str = "postings.json";
const METADATA_VERSION: u32 = 1;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One keyword hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Hit {
    pub doc_id: String,
    pub score: f32,
    pub text: String,
}

#[derive(Serialize, Deserialize)]
struct Metadata {
    version: u32,
    doc_ids: Vec<String>,
    documents: HashMap<String, String>,
    doc_source_map: HashMap<String, String>,
}

#[derive(Serialize, Deserialize, Default, Clone)]
struct Postings {
    /// term → (document position, term frequency)
    terms: HashMap<String, Vec<(u32, u32)>>,
    doc_len: Vec<u32>,
    avg_len: f32,
}

#[derive(Default)]
struct Bm25State {
    /// id → text, insertion-ordered so rebuilds are deterministic.
    documents: IndexMap<String, String>,
    doc_source_map: HashMap<String, String>,
    /// Index order captured at the last rebuild.
    doc_ids: Vec<String>,
    postings: Option<Postings>,
    needs_rebuild: bool,
}

/// BM25 inverted index with atomic on-disk persistence.
pub struct Bm25Index {
    params: Bm25Params,
    persist_dir: Option<PathBuf>,
    tokenizer: Tokenizer,
    state: Mutex<Bm25State>,
}

impl Bm25Index {
    /// Create an index; when `persist_dir` is given, existing state is
    /// loaded from disk (including crash recovery).
    pub fn new(params: Bm25Params, persist_dir: Option<PathBuf>) -> Self {
        Self::with_tokenizer(params, persist_dir, Tokenizer::simple())
    }

    /// Create an index with a custom tokenizer (e.g. a morphological
    /// analyzer behind the [`crate::index::tokenize::Tokenize`] trait).
    pub fn with_tokenizer(
        params: Bm25Params,
        persist_dir: Option<PathBuf>,
        tokenizer: Tokenizer,
    ) -> Self {
        let index = Self {
            params,
            persist_dir,
            tokenizer,
            state: Mutex::new(Bm25State {
                needs_rebuild: true,
                ..Bm25State::default()
            }),
        };
        index.load();
        index
    }

    /// Insert or update `(id, text, source_url)` documents. Returns the
    /// number of newly added (not updated) documents.
    pub fn add_documents(&self, documents: &[(String, String, String)]) -> usize {
        if documents.is_empty() {
            return 0;
        }

        let snapshot = {
            let mut state = self.state.lock().unwrap();
            let mut added = 0;
            for (doc_id, text, source_url) in documents {
                if state.documents.insert(doc_id.clone(), text.clone()).is_none() {
                    added += 1;
                }
                state
                    .doc_source_map
                    .insert(doc_id.clone(), source_url.clone());
            }
            state.needs_rebuild = true;
            debug!(
                added,
                updated = documents.len() - added,
                "BM25 documents upserted"
            );
            (added, self.snapshot_for_save(&mut state))
        };

        self.save(snapshot.1);
        snapshot.0
    }

    /// Keyword search; results carry raw BM25 scores, strictly positive,
    /// in descending order.
    pub fn search(&self, query: &str, k: usize) -> Vec<Bm25Hit> {
        let mut state = self.state.lock().unwrap();
        if state.documents.is_empty() || k == 0 {
            return Vec::new();
        }
        if state.needs_rebuild {
            self.rebuild(&mut state);
        }

        let Some(postings) = &state.postings else {
            return Vec::new();
        };
        let query_tokens = self.tokenizer.tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let total_docs = state.doc_ids.len();
        let mut scores: HashMap<u32, f32> = HashMap::new();
        for token in &query_tokens {
            let Some(entries) = postings.terms.get(token) else {
                continue;
            };
            let df = entries.len() as f32;
            let idf = (1.0 + (total_docs as f32 - df + 0.5) / (df + 0.5)).ln();
            for &(doc_idx, tf) in entries {
                let len = postings.doc_len[doc_idx as usize] as f32;
                let tf = tf as f32;
                let denom = tf
                    + self.params.k1
                        * (1.0 - self.params.b + self.params.b * len / postings.avg_len.max(1.0));
                *scores.entry(doc_idx).or_insert(0.0) += idf * tf * (self.params.k1 + 1.0) / denom;
            }
        }

        let mut ranked: Vec<(u32, f32)> = scores
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(k);

        ranked
            .into_iter()
            .map(|(doc_idx, score)| {
                let doc_id = state.doc_ids[doc_idx as usize].clone();
                let text = state.documents.get(&doc_id).cloned().unwrap_or_default();
                Bm25Hit {
                    doc_id,
                    score,
                    text,
                }
            })
            .collect()
    }

    /// Drop all documents stored for a source URL. Returns the count.
    pub fn delete_by_source(&self, source_url: &str) -> usize {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            let to_delete: Vec<String> = state
                .doc_source_map
                .iter()
                .filter(|(_, url)| url.as_str() == source_url)
                .map(|(id, _)| id.clone())
                .collect();

            if to_delete.is_empty() {
                return 0;
            }
            for doc_id in &to_delete {
                state.documents.shift_remove(doc_id);
                state.doc_source_map.remove(doc_id);
            }
            state.needs_rebuild = true;
            debug!(count = to_delete.len(), source_url, "BM25 documents deleted");
            (to_delete.len(), self.snapshot_for_save(&mut state))
        };

        self.save(snapshot.1);
        snapshot.0
    }

    /// Number of indexed documents.
    pub fn document_count(&self) -> usize {
        self.state.lock().unwrap().documents.len()
    }

    /// Source URL recorded for a document id.
    pub fn source_url(&self, doc_id: &str) -> Option<String> {
        self.state.lock().unwrap().doc_source_map.get(doc_id).cloned()
    }

    fn rebuild(&self, state: &mut Bm25State) {
        state.doc_ids = state.documents.keys().cloned().collect();

        let mut terms: HashMap<String, Vec<(u32, u32)>> = HashMap::new();
        let mut doc_len: Vec<u32> = Vec::with_capacity(state.doc_ids.len());

        for (doc_idx, doc_id) in state.doc_ids.iter().enumerate() {
            let tokens = self.tokenizer.tokenize(&state.documents[doc_id]);
            doc_len.push(tokens.len() as u32);

            let mut tf: HashMap<&str, u32> = HashMap::new();
            for token in &tokens {
                *tf.entry(token.as_str()).or_insert(0) += 1;
            }
            for (token, count) in tf {
                terms
                    .entry(token.to_string())
                    .or_default()
                    .push((doc_idx as u32, count));
            }
        }

        let avg_len = if doc_len.is_empty() {
            0.0
        } else {
            doc_len.iter().sum::<u32>() as f32 / doc_len.len() as f32
        };

        state.postings = Some(Postings {
            terms,
            doc_len,
            avg_len,
        });
        state.needs_rebuild = false;
        debug!(documents = state.doc_ids.len(), "BM25 index rebuilt");
    }

    /// Capture a consistent snapshot for persistence, rebuilding first so
    /// the stored postings match the stored documents.
    fn snapshot_for_save(&self, state: &mut Bm25State) -> Option<(Metadata, Postings)> {
        if self.persist_dir.is_none() {
            return None;
        }
        if state.documents.is_empty() {
            // Signal "remove the directory" with empty metadata.
            return Some((
                Metadata {
                    version: METADATA_VERSION,
                    doc_ids: Vec::new(),
                    documents: HashMap::new(),
                    doc_source_map: HashMap::new(),
                },
                Postings::default(),
            ));
        }
        if state.needs_rebuild {
            self.rebuild(state);
        }
        let postings = state.postings.clone()?;
        Some((
            Metadata {
                version: METADATA_VERSION,
                doc_ids: state.doc_ids.clone(),
                documents: state.documents.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                doc_source_map: state.doc_source_map.clone(),
            },
            postings,
        ))
    }

    /// Persist a snapshot. Failures leave the in-memory index valid and
    /// only log; the next write retries.
    fn save(&self, snapshot: Option<(Metadata, Postings)>) {
        let (Some(dir), Some((metadata, postings))) = (&self.persist_dir, snapshot) else {
            return;
        };

        if metadata.doc_ids.is_empty() {
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(dir) {
                    warn!(dir = %dir.display(), error = %e, "failed to remove empty BM25 dir");
                } else {
                    debug!(dir = %dir.display(), "removed empty BM25 persist dir");
                }
            }
            return;
        }

        if let Err(e) = self.save_atomic(dir, &metadata, &postings) {
            warn!(dir = %dir.display(), error = %e, "failed to save BM25 index");
        } else {
            debug!(dir = %dir.display(), documents = metadata.doc_ids.len(), "BM25 index saved");
        }
    }

    fn save_atomic(
        &self,
        dir: &Path,
        metadata: &Metadata,
        postings: &Postings,
    ) -> std::io::Result<()> {
        let parent = dir.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bm25_index".to_string());
        let old_dir = parent.join(format!("{name}_old"));
        let tmp_dir = parent.join(format!(
            "{name}_tmp_{}_{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(tmp_dir.join(POSTINGS_SUBDIR))?;
            std::fs::write(
                tmp_dir.join(METADATA_FILENAME),
                serde_json::to_vec(metadata)?,
            )?;
            std::fs::write(
                tmp_dir.join(POSTINGS_SUBDIR).join(POSTINGS_FILENAME),
                serde_json::to_vec(postings)?,
            )?;

            // Swap: live → _old, tmp → live, drop _old.
            if old_dir.exists() {
                std::fs::remove_dir_all(&old_dir)?;
            }
            if dir.exists() {
                std::fs::rename(dir, &old_dir)?;
            }
            std::fs::rename(&tmp_dir, dir)?;
            if old_dir.exists() {
                std::fs::remove_dir_all(&old_dir)?;
            }
            Ok(())
        };

        let result = write();
        if result.is_err() {
            // Roll back: restore the previous live dir, drop the temp dir.
            if old_dir.exists() && !dir.exists() {
                let _ = std::fs::rename(&old_dir, dir);
            }
            if tmp_dir.exists() {
                let _ = std::fs::remove_dir_all(&tmp_dir);
            }
        }
        result
    }

    fn load(&self) {
        let Some(dir) = &self.persist_dir else {
            return;
        };

        // Crash recovery: a leftover _old with no live dir is the previous
        // good state.
        let parent = dir.parent().unwrap_or_else(|| Path::new("."));
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let old_dir = parent.join(format!("{name}_old"));
        if old_dir.exists() && !dir.exists() {
            if std::fs::rename(&old_dir, dir).is_ok() {
                warn!(dir = %dir.display(), "recovered BM25 index from _old directory");
            }
        }

        if !dir.exists() {
            return;
        }

        let metadata_path = dir.join(METADATA_FILENAME);
        let metadata: Metadata = match std::fs::read(&metadata_path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_slice(&raw).map_err(|e| e.to_string()))
        {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %metadata_path.display(), error = %e, "unreadable BM25 metadata, starting with empty index");
                return;
            }
        };

        if metadata.version != METADATA_VERSION {
            warn!(
                expected = METADATA_VERSION,
                got = metadata.version,
                "BM25 metadata version mismatch, starting with empty index"
            );
            return;
        }

        let postings_path = dir.join(POSTINGS_SUBDIR).join(POSTINGS_FILENAME);
        let postings: Option<Postings> = std::fs::read(&postings_path)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok());
        if postings.is_none() {
            warn!(path = %postings_path.display(), "BM25 postings missing, starting with empty index");
            return;
        }

        let mut state = self.state.lock().unwrap();
        state.documents = metadata
            .doc_ids
            .iter()
            .filter_map(|id| metadata.documents.get(id).map(|t| (id.clone(), t.clone())))
            .collect();
        state.doc_source_map = metadata.doc_source_map;
        state.doc_ids = metadata.doc_ids;
        state.postings = postings;
        state.needs_rebuild = false;
        info!(dir = %dir.display(), documents = state.doc_ids.len(), "BM25 index loaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, text: &str, url: &str) -> (String, String, String) {
        (id.to_string(), text.to_string(), url.to_string())
    }

    fn index() -> Bm25Index {
        Bm25Index::new(Bm25Params::default(), None)
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        assert!(index().search("anything", 10).is_empty());
    }

    #[test]
    fn test_add_and_search() {
        let idx = index();
        idx.add_documents(&[
            doc("a_0", "rust systems programming language", "https://ex.com/a"),
            doc("b_0", "python scripting language tutorial", "https://ex.com/b"),
        ]);

        let hits = idx.search("rust programming", 10);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].doc_id, "a_0");
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn test_update_replaces_text() {
        let idx = index();
        idx.add_documents(&[doc("a_0", "old topic entirely", "https://ex.com/a")]);
        idx.add_documents(&[doc("a_0", "fresh keywords now", "https://ex.com/a")]);

        assert_eq!(idx.document_count(), 1);
        assert!(idx.search("old topic", 10).is_empty());
        assert!(!idx.search("fresh keywords", 10).is_empty());
    }

    #[test]
    fn test_japanese_keyword_match() {
        let idx = index();
        idx.add_documents(&[doc(
            "m_0",
            "名前: りゅうおう | HP: 200 | 属性: フロベニウスノルム",
            "https://ex.com/m",
        )]);

        let hits = idx.search("フロベニウスノルム", 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "m_0");
    }

    #[test]
    fn test_delete_by_source() {
        let idx = index();
        idx.add_documents(&[
            doc("a_0", "alpha text", "https://ex.com/a"),
            doc("a_1", "alpha more", "https://ex.com/a"),
            doc("b_0", "beta text", "https://ex.com/b"),
        ]);

        assert_eq!(idx.delete_by_source("https://ex.com/a"), 2);
        assert_eq!(idx.document_count(), 1);
        assert!(idx.search("alpha", 10).is_empty());
        assert_eq!(idx.delete_by_source("https://ex.com/a"), 0);
    }

    #[test]
    fn test_source_url_lookup() {
        let idx = index();
        idx.add_documents(&[doc("a_0", "text", "https://ex.com/a")]);
        assert_eq!(idx.source_url("a_0").as_deref(), Some("https://ex.com/a"));
        assert!(idx.source_url("missing").is_none());
    }

    #[test]
    fn test_scores_only_positive_and_capped_at_k() {
        let idx = index();
        for i in 0..20 {
            idx.add_documents(&[doc(
                &format!("d_{i}"),
                &format!("shared keyword document number {i}"),
                "https://ex.com/d",
            )]);
        }
        let hits = idx.search("keyword", 5);
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|h| h.score > 0.0));
        // Descending order.
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_persistence_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("bm25_index");

        let idx = Bm25Index::new(Bm25Params::default(), Some(dir.clone()));
        idx.add_documents(&[
            doc("a_0", "rust retrieval engine", "https://ex.com/a"),
            doc("b_0", "python web crawler", "https://ex.com/b"),
        ]);
        let before: Vec<String> = idx
            .search("rust engine", 5)
            .into_iter()
            .map(|h| h.doc_id)
            .collect();
        drop(idx);

        let reloaded = Bm25Index::new(Bm25Params::default(), Some(dir));
        assert_eq!(reloaded.document_count(), 2);
        let after: Vec<String> = reloaded
            .search("rust engine", 5)
            .into_iter()
            .map(|h| h.doc_id)
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_crash_recovery_from_old_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("bm25_index");

        let idx = Bm25Index::new(Bm25Params::default(), Some(dir.clone()));
        idx.add_documents(&[doc("a_0", "recoverable content", "https://ex.com/a")]);
        drop(idx);

        // Simulate a crash between the two renames.
        let old_dir = tmp.path().join("bm25_index_old");
        std::fs::rename(&dir, &old_dir).unwrap();

        let recovered = Bm25Index::new(Bm25Params::default(), Some(dir));
        assert_eq!(recovered.document_count(), 1);
        assert!(!recovered.search("recoverable", 5).is_empty());
    }

    #[test]
    fn test_version_mismatch_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("bm25_index");

        let idx = Bm25Index::new(Bm25Params::default(), Some(dir.clone()));
        idx.add_documents(&[doc("a_0", "some content", "https://ex.com/a")]);
        drop(idx);

        let metadata_path = dir.join(METADATA_FILENAME);
        let raw = std::fs::read_to_string(&metadata_path).unwrap();
        std::fs::write(&metadata_path, raw.replace("\"version\":1", "\"version\":99")).unwrap();

        let reloaded = Bm25Index::new(Bm25Params::default(), Some(dir));
        assert_eq!(reloaded.document_count(), 0);
    }

    #[test]
    fn test_deleting_all_documents_removes_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("bm25_index");

        let idx = Bm25Index::new(Bm25Params::default(), Some(dir.clone()));
        idx.add_documents(&[doc("a_0", "content", "https://ex.com/a")]);
        assert!(dir.exists());

        idx.delete_by_source("https://ex.com/a");
        assert!(!dir.exists());
    }
}
