//! Hybrid rank fusion: vector similarity + BM25, convex combination.
//!
//! Both engines over-fetch, each side is min-max normalized, and the
//! fused score is `α·vec + (1−α)·bm25` with 0 for the missing side. When
//! a similarity threshold is set it acts as a hard quality gate: a
//! document that failed the vector side cannot re-enter on keywords alone.

use std::collections::HashMap;

use tracing::debug;

use crate::index::bm25::Bm25Hit;
use crate::index::vector::VectorHit;

/// One fused hit.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridHit {
    pub doc_id: String,
    pub text: String,
    /// Source URL; empty only when BM25 lost track of the document.
    pub source_url: String,
    /// Cosine distance when the vector side saw this document.
    pub vector_distance: Option<f32>,
    /// Raw BM25 score when the keyword side saw this document.
    pub bm25_score: Option<f32>,
    /// Convex combination of the normalized scores, in `[0, 1]`.
    pub combined_score: f32,
}

/// Candidate over-fetch budget per engine for a final cut of `k`.
pub fn fetch_budget(k: usize) -> usize {
    (3 * k).max(30)
}

/// Min-max normalize into `[0, 1]`. All-equal inputs normalize to 1.0.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / (max - min)).collect()
}

/// `score(d) = α · vec(d) + (1 − α) · bm25(d)`, missing side scored 0.
pub fn convex_combination(
    norm_vector: &HashMap<String, f32>,
    norm_bm25: &HashMap<String, f32>,
    vector_weight: f32,
) -> HashMap<String, f32> {
    let alpha = vector_weight.clamp(0.0, 1.0);
    let beta = 1.0 - alpha;

    let mut scores = HashMap::new();
    for doc_id in norm_vector.keys().chain(norm_bm25.keys()) {
        if scores.contains_key(doc_id) {
            continue;
        }
        let v = norm_vector.get(doc_id).copied().unwrap_or(0.0);
        let b = norm_bm25.get(doc_id).copied().unwrap_or(0.0);
        scores.insert(doc_id.clone(), alpha * v + beta * b);
    }
    scores
}

/// Fuses per-engine candidate lists into one ranking.
#[derive(Debug, Clone)]
pub struct HybridRanker {
    vector_weight: f32,
    min_combined_score: Option<f32>,
}

impl HybridRanker {
    /// Ranker with fusion weight α (clamped to `[0, 1]`).
    pub fn new(vector_weight: f32) -> Self {
        Self {
            vector_weight: vector_weight.clamp(0.0, 1.0),
            min_combined_score: None,
        }
    }

    /// Apply a post-fusion combined-score cutoff.
    pub fn with_min_combined_score(mut self, cutoff: Option<f32>) -> Self {
        self.min_combined_score = cutoff;
        self
    }

    /// Fuse candidates. `bm25_hits` carry the source URL resolved from the
    /// keyword index; `similarity_threshold` gates on cosine distance.
    pub fn fuse(
        &self,
        vector_hits: Vec<VectorHit>,
        bm25_hits: Vec<(Bm25Hit, Option<String>)>,
        k: usize,
        similarity_threshold: Option<f32>,
    ) -> Vec<HybridHit> {
        if vector_hits.is_empty() && bm25_hits.is_empty() {
            return Vec::new();
        }

        // Vector side: similarity = 1 − distance; candidates over the
        // threshold keep their data but score 0 and fall out of the gate.
        let mut vector_data: HashMap<String, &VectorHit> = HashMap::new();
        let mut vector_rank: HashMap<String, usize> = HashMap::new();
        let mut surviving: Vec<(String, f32)> = Vec::new();

        for (rank, hit) in vector_hits.iter().enumerate() {
            vector_data.insert(hit.id.clone(), hit);
            vector_rank.entry(hit.id.clone()).or_insert(rank);

            let similarity = 1.0 - hit.distance;
            let gated_out =
                similarity_threshold.is_some_and(|t| hit.distance > t) || similarity <= 0.0;
            if !gated_out {
                surviving.push((hit.id.clone(), similarity));
            }
        }

        let normalized = min_max_normalize(
            &surviving.iter().map(|(_, s)| *s).collect::<Vec<f32>>(),
        );
        let norm_vector: HashMap<String, f32> = surviving
            .iter()
            .map(|(id, _)| id.clone())
            .zip(normalized)
            .collect();

        // BM25 side: normalize all raw scores.
        let bm25_scores: Vec<f32> = bm25_hits.iter().map(|(h, _)| h.score).collect();
        let bm25_normalized = min_max_normalize(&bm25_scores);
        let norm_bm25: HashMap<String, f32> = bm25_hits
            .iter()
            .map(|(h, _)| h.doc_id.clone())
            .zip(bm25_normalized)
            .collect();
        let bm25_data: HashMap<String, (&Bm25Hit, &Option<String>)> = bm25_hits
            .iter()
            .map(|(h, src)| (h.doc_id.clone(), (h, src)))
            .collect();

        let combined = convex_combination(&norm_vector, &norm_bm25, self.vector_weight);

        let mut results: Vec<HybridHit> = Vec::new();
        for (doc_id, score) in &combined {
            if *score <= 0.0 {
                continue;
            }
            if let Some(min) = self.min_combined_score {
                if *score < min {
                    continue;
                }
            }
            // Quality gate: with a threshold set, BM25-only documents and
            // gated-out vector candidates are excluded.
            if similarity_threshold.is_some() && !norm_vector.contains_key(doc_id) {
                debug!(doc_id, "excluded by vector quality gate");
                continue;
            }

            let hit = match vector_data.get(doc_id) {
                Some(v) => HybridHit {
                    doc_id: doc_id.clone(),
                    text: v.text.clone(),
                    source_url: v.source_url.clone(),
                    vector_distance: Some(v.distance),
                    bm25_score: bm25_data.get(doc_id).map(|(h, _)| h.score),
                    combined_score: *score,
                },
                None => {
                    let Some(&(bm25, source)) = bm25_data.get(doc_id) else {
                        continue;
                    };
                    HybridHit {
                        doc_id: doc_id.clone(),
                        text: bm25.text.clone(),
                        source_url: source.clone().unwrap_or_default(),
                        vector_distance: None,
                        bm25_score: Some(bm25.score),
                        combined_score: *score,
                    }
                }
            };
            results.push(hit);
        }

        results.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ra = vector_rank.get(&a.doc_id).copied().unwrap_or(usize::MAX);
                    let rb = vector_rank.get(&b.doc_id).copied().unwrap_or(usize::MAX);
                    ra.cmp(&rb)
                })
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        results.truncate(k);
        results
    }
}
