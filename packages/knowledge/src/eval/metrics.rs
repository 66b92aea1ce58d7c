//! Retrieval quality metrics.
//!
//! Precision/recall/F1 use set semantics over source URLs; NDCG and MRR
//! are rank-aware over the retrieved order with binary relevance.

use std::collections::HashSet;

/// Precision/recall/F1 with the underlying counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecisionRecall {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

/// Set-based precision/recall/F1.
///
/// Corner cases: nothing retrieved and nothing expected is a perfect
/// score; retrieving anything against an empty expectation (or nothing
/// against a nonempty one) scores zero.
pub fn calculate_precision_recall(retrieved: &[String], expected: &[String]) -> PrecisionRecall {
    let retrieved_set: HashSet<&str> = retrieved.iter().map(String::as_str).collect();
    let expected_set: HashSet<&str> = expected.iter().map(String::as_str).collect();

    let true_positives = retrieved_set.intersection(&expected_set).count();
    let false_positives = retrieved_set.difference(&expected_set).count();
    let false_negatives = expected_set.difference(&retrieved_set).count();

    let precision = if !retrieved_set.is_empty() {
        true_positives as f64 / retrieved_set.len() as f64
    } else if expected_set.is_empty() {
        1.0
    } else {
        0.0
    };

    let recall = if !expected_set.is_empty() {
        true_positives as f64 / expected_set.len() as f64
    } else if retrieved_set.is_empty() {
        1.0
    } else {
        0.0
    };

    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    PrecisionRecall {
        precision,
        recall,
        f1,
        true_positives,
        false_positives,
        false_negatives,
    }
}

/// NDCG with binary relevance and `1 / log2(rank + 1)` discount
/// (rank 1-based). `k` limits the evaluated prefix.
pub fn calculate_ndcg(retrieved: &[String], expected: &[String], k: Option<usize>) -> f64 {
    if expected.is_empty() {
        return if retrieved.is_empty() { 1.0 } else { 0.0 };
    }

    let expected_set: HashSet<&str> = expected.iter().map(String::as_str).collect();
    let items = match k {
        Some(k) => &retrieved[..retrieved.len().min(k)],
        None => retrieved,
    };

    let dcg: f64 = items
        .iter()
        .enumerate()
        .filter(|(_, source)| expected_set.contains(source.as_str()))
        .map(|(i, _)| 1.0 / ((i + 2) as f64).log2())
        .sum();

    let ideal_count = expected_set.len().min(items.len());
    let idcg: f64 = (0..ideal_count).map(|i| 1.0 / ((i + 2) as f64).log2()).sum();

    if idcg == 0.0 {
        0.0
    } else {
        dcg / idcg
    }
}

/// Reciprocal rank of the first retrieved URL that is expected; 0 if none.
pub fn calculate_mrr(retrieved: &[String], expected: &[String]) -> f64 {
    if expected.is_empty() {
        return if retrieved.is_empty() { 1.0 } else { 0.0 };
    }

    let expected_set: HashSet<&str> = expected.iter().map(String::as_str).collect();
    retrieved
        .iter()
        .position(|source| expected_set.contains(source.as_str()))
        .map(|i| 1.0 / (i + 1) as f64)
        .unwrap_or(0.0)
}

/// Retrieved URLs that appear in the forbidden list.
pub fn check_negative_sources(retrieved: &[String], negative: &[String]) -> Vec<String> {
    let negative_set: HashSet<&str> = negative.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    retrieved
        .iter()
        .filter(|source| negative_set.contains(source.as_str()))
        .filter(|source| seen.insert(source.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_perfect_retrieval() {
        let result = calculate_precision_recall(&urls(&["a", "b"]), &urls(&["a", "b"]));
        assert_eq!(result.precision, 1.0);
        assert_eq!(result.recall, 1.0);
        assert_eq!(result.f1, 1.0);
        assert_eq!(result.true_positives, 2);
    }

    #[test]
    fn test_both_empty_is_perfect() {
        let result = calculate_precision_recall(&[], &[]);
        assert_eq!((result.precision, result.recall, result.f1), (1.0, 1.0, 1.0));
    }

    #[test]
    fn test_empty_retrieved_nonempty_expected_is_zero() {
        let result = calculate_precision_recall(&[], &urls(&["a"]));
        assert_eq!((result.precision, result.recall, result.f1), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_nonempty_retrieved_empty_expected_is_zero() {
        let result = calculate_precision_recall(&urls(&["a"]), &[]);
        assert_eq!((result.precision, result.recall, result.f1), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_partial_overlap() {
        let result = calculate_precision_recall(&urls(&["a", "b", "c", "d"]), &urls(&["a", "b"]));
        assert_eq!(result.precision, 0.5);
        assert_eq!(result.recall, 1.0);
        assert!((result.f1 - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_duplicates_use_set_semantics() {
        let result = calculate_precision_recall(&urls(&["a", "a", "a"]), &urls(&["a"]));
        assert_eq!(result.precision, 1.0);
        assert_eq!(result.recall, 1.0);
    }

    #[test]
    fn test_ndcg_perfect_ranking() {
        let ndcg = calculate_ndcg(&urls(&["a", "b", "x"]), &urls(&["a", "b"]), None);
        assert!((ndcg - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ndcg_no_relevant_results() {
        let ndcg = calculate_ndcg(&urls(&["x", "y"]), &urls(&["a"]), None);
        assert_eq!(ndcg, 0.0);
    }

    #[test]
    fn test_ndcg_late_hit_is_discounted() {
        let early = calculate_ndcg(&urls(&["a", "x", "y"]), &urls(&["a"]), None);
        let late = calculate_ndcg(&urls(&["x", "y", "a"]), &urls(&["a"]), None);
        assert!(early > late);
        assert!(late > 0.0);
    }

    #[test]
    fn test_ndcg_bounds() {
        let cases: &[(&[&str], &[&str])] = &[
            (&["a", "b"], &["b"]),
            (&["a"], &["a", "b", "c"]),
            (&[], &["a"]),
            (&["a"], &[]),
            (&[], &[]),
        ];
        for (retrieved, expected) in cases {
            let ndcg = calculate_ndcg(&urls(retrieved), &urls(expected), None);
            assert!((0.0..=1.0).contains(&ndcg), "out of bounds: {ndcg}");
        }
    }

    #[test]
    fn test_ndcg_empty_expected_corner_cases() {
        assert_eq!(calculate_ndcg(&[], &[], None), 1.0);
        assert_eq!(calculate_ndcg(&urls(&["a"]), &[], None), 0.0);
    }

    #[test]
    fn test_ndcg_respects_k() {
        let ndcg = calculate_ndcg(&urls(&["x", "y", "a"]), &urls(&["a"]), Some(2));
        assert_eq!(ndcg, 0.0);
    }

    #[test]
    fn test_mrr_rank_positions() {
        assert_eq!(calculate_mrr(&urls(&["a", "x"]), &urls(&["a"])), 1.0);
        assert_eq!(calculate_mrr(&urls(&["x", "a"]), &urls(&["a"])), 0.5);
        assert!((calculate_mrr(&urls(&["x", "y", "a"]), &urls(&["a"])) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_mrr_no_hit_is_zero() {
        assert_eq!(calculate_mrr(&urls(&["x", "y"]), &urls(&["a"])), 0.0);
    }

    #[test]
    fn test_mrr_empty_expected_corner_cases() {
        assert_eq!(calculate_mrr(&[], &[]), 1.0);
        assert_eq!(calculate_mrr(&urls(&["a"]), &[]), 0.0);
    }

    #[test]
    fn test_negative_sources() {
        let violations = check_negative_sources(
            &urls(&["a", "bad1", "b", "bad2"]),
            &urls(&["bad1", "bad2", "bad3"]),
        );
        assert_eq!(violations, urls(&["bad1", "bad2"]));
        assert!(check_negative_sources(&urls(&["a"]), &urls(&["bad"])).is_empty());
    }
}
