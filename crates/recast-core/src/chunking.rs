//! Chunked inference helpers.
//!
//! Long inputs are cut into non-overlapping chunks that fit the model
//! context; per-chunk probability pairs are averaged arithmetically.

use crate::types::ProbabilityPair;

/// Split `tokens` into consecutive chunks of at most `max_len` items.
///
/// A `max_len` of zero is treated as one.
pub fn chunk_tokens<T: Clone>(tokens: &[T], max_len: usize) -> Vec<Vec<T>> {
    tokens
        .chunks(max_len.max(1))
        .map(<[T]>::to_vec)
        .collect()
}

/// Arithmetic mean of per-chunk pairs. No chunks yields the neutral pair.
pub fn average_pairs(pairs: &[ProbabilityPair]) -> ProbabilityPair {
    if pairs.is_empty() {
        return ProbabilityPair::neutral();
    }
    let n = pairs.len() as f64;
    let (authentic, manufactured) = pairs.iter().fold((0.0, 0.0), |(a, m), p| {
        (a + p.authentic, m + p.manufactured)
    });
    ProbabilityPair::new(authentic / n, manufactured / n)
}

/// Two-class softmax over raw logits, in `[authentic, manufactured]` order.
pub fn softmax_pair(authentic_logit: f64, manufactured_logit: f64) -> ProbabilityPair {
    let max = authentic_logit.max(manufactured_logit);
    let a = (authentic_logit - max).exp();
    let m = (manufactured_logit - max).exp();
    ProbabilityPair::new(a / (a + m), m / (a + m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_three_chunk_average() {
        let pairs = [
            ProbabilityPair::new(0.9, 0.1),
            ProbabilityPair::new(0.7, 0.3),
            ProbabilityPair::new(0.5, 0.5),
        ];
        let avg = average_pairs(&pairs);
        assert!((avg.authentic - 0.7).abs() < 1e-12);
        assert!((avg.manufactured - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_empty_average_is_neutral() {
        assert_eq!(average_pairs(&[]), ProbabilityPair::neutral());
    }

    #[test]
    fn test_chunking_without_overlap() {
        let tokens: Vec<u32> = (0..7).collect();
        let chunks = chunk_tokens(&tokens, 3);
        assert_eq!(chunks, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
        assert_eq!(chunk_tokens(&tokens, 0).len(), 7);
        assert!(chunk_tokens::<u32>(&[], 3).is_empty());
    }

    #[test]
    fn test_softmax_pair() {
        let p = softmax_pair(0.0, 0.0);
        assert_eq!(p, ProbabilityPair::neutral());
        let p = softmax_pair(2.0, -1.0);
        assert!(p.authentic > 0.9);
        assert!((p.authentic + p.manufactured - 1.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_chunks_cover_input(len in 0usize..200, max in 1usize..64) {
            let tokens: Vec<usize> = (0..len).collect();
            let chunks = chunk_tokens(&tokens, max);
            prop_assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= max));
            let flat: Vec<usize> = chunks.concat();
            prop_assert_eq!(flat, tokens);
        }

        #[test]
        fn prop_average_stays_within_bounds(
            raw in proptest::collection::vec(0.0f64..=1.0, 1..10)
        ) {
            let pairs: Vec<ProbabilityPair> =
                raw.iter().map(|&a| ProbabilityPair::new(a, 1.0 - a)).collect();
            let avg = average_pairs(&pairs);
            let min = raw.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = raw.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(avg.authentic >= min - 1e-9 && avg.authentic <= max + 1e-9);
            prop_assert!((avg.authentic + avg.manufactured - 1.0).abs() < 1e-9);
        }
    }
}
