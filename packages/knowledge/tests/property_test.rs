//! Property tests for the chunker, score normalization, and chunk ids.

use proptest::prelude::*;

use knowledge::chunk::chunk_text;
use knowledge::search::min_max_normalize;
use knowledge::types::chunk_id;

proptest! {
    #[test]
    fn prose_chunks_never_exceed_size(
        text in ".{0,600}",
        chunk_size in 10usize..200,
        chunk_overlap in 0usize..10,
    ) {
        let chunks = chunk_text(&text, chunk_size, chunk_overlap);
        for chunk in &chunks {
            prop_assert!(chunk.chars().count() <= chunk_size, "oversized chunk: {chunk:?}");
        }
        if !text.trim().is_empty() {
            prop_assert!(!chunks.is_empty());
        }
    }

    #[test]
    fn short_input_is_returned_whole(text in "\\PC{1,50}", chunk_size in 100usize..200) {
        prop_assume!(!text.trim().is_empty());
        prop_assume!(text.chars().count() <= chunk_size);
        let chunks = chunk_text(&text, chunk_size, 10);
        prop_assert_eq!(chunks, vec![text.trim().to_string()]);
    }

    #[test]
    fn min_max_normalize_stays_in_unit_interval(scores in prop::collection::vec(-1e6f32..1e6, 0..50)) {
        let normalized = min_max_normalize(&scores);
        prop_assert_eq!(normalized.len(), scores.len());
        for value in normalized {
            prop_assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn equal_scores_normalize_to_one(score in -1e6f32..1e6, count in 1usize..20) {
        let scores = vec![score; count];
        prop_assert!(min_max_normalize(&scores).iter().all(|v| *v == 1.0));
    }

    #[test]
    fn chunk_ids_are_deterministic_and_positional(url in "https://[a-z]{1,10}\\.com/[a-z]{0,10}", index in 0usize..100) {
        let id = chunk_id(&url, index);
        prop_assert_eq!(&id, &chunk_id(&url, index));
        let suffix = format!("_{}", index);
        prop_assert!(id.ends_with(&suffix));
        prop_assert_ne!(id, chunk_id(&url, index + 1));
    }
}
