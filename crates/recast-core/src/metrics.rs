//! Reference text-quality scorer.
//!
//! Lexical approximations only: sentence BLEU, ROUGE-1/2/L F-measures,
//! Flesch reading ease and bag-of-words cosine as a stand-in for semantic
//! similarity. Callers needing embedding-based similarity inject their
//! own [`MetricsScorer`].

use std::collections::HashMap;

use crate::types::{OverlapScores, TextMetrics};

/// Compares an original text with its revision.
pub trait MetricsScorer: Send + Sync {
    fn score(&self, original: &str, modified: &str) -> TextMetrics;
}

/// Lexical reference implementation of [`MetricsScorer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalScorer;

impl MetricsScorer for LexicalScorer {
    fn score(&self, original: &str, modified: &str) -> TextMetrics {
        let reference = words(original);
        let candidate = words(modified);
        TextMetrics {
            similarity_score: bleu(&reference, &candidate),
            overlap_scores: OverlapScores {
                rouge1: rouge_n(&reference, &candidate, 1),
                rouge2: rouge_n(&reference, &candidate, 2),
                rouge_l: rouge_l(&reference, &candidate),
            },
            readability_score: flesch_reading_ease(modified),
            semantic_similarity_score: cosine(&reference, &candidate),
        }
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if n == 0 || tokens.len() < n {
        return counts;
    }
    for gram in tokens.windows(n) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

fn clipped_overlap(reference: &[String], candidate: &[String], n: usize) -> (usize, usize) {
    let ref_counts = ngram_counts(reference, n);
    let cand_counts = ngram_counts(candidate, n);
    let overlap = cand_counts
        .iter()
        .map(|(gram, count)| (*count).min(ref_counts.get(gram).copied().unwrap_or(0)))
        .sum();
    (overlap, cand_counts.values().sum())
}

/// Sentence BLEU with uniform 1-4 gram weights and brevity penalty.
pub fn bleu(reference: &[String], candidate: &[String]) -> f64 {
    if candidate.is_empty() || reference.is_empty() {
        return 0.0;
    }

    let mut log_sum = 0.0;
    for n in 1..=4 {
        let (overlap, total) = clipped_overlap(reference, candidate, n);
        if overlap == 0 || total == 0 {
            return 0.0;
        }
        log_sum += (overlap as f64 / total as f64).ln() / 4.0;
    }

    let (r, c) = (reference.len() as f64, candidate.len() as f64);
    let brevity = if c > r { 1.0 } else { (1.0 - r / c).exp() };
    brevity * log_sum.exp()
}

fn f_measure(overlap: f64, ref_total: f64, cand_total: f64) -> f64 {
    if overlap == 0.0 || ref_total == 0.0 || cand_total == 0.0 {
        return 0.0;
    }
    let recall = overlap / ref_total;
    let precision = overlap / cand_total;
    2.0 * precision * recall / (precision + recall)
}

/// ROUGE-N F-measure.
pub fn rouge_n(reference: &[String], candidate: &[String], n: usize) -> f64 {
    let (overlap, cand_total) = clipped_overlap(reference, candidate, n);
    let ref_total = reference.len().saturating_sub(n - 1);
    f_measure(overlap as f64, ref_total as f64, cand_total as f64)
}

/// ROUGE-L F-measure over the longest common subsequence.
pub fn rouge_l(reference: &[String], candidate: &[String]) -> f64 {
    let mut prev = vec![0usize; candidate.len() + 1];
    let mut curr = vec![0usize; candidate.len() + 1];
    for r in reference {
        for (j, c) in candidate.iter().enumerate() {
            curr[j + 1] = if r == c {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs = prev[candidate.len()];
    f_measure(lcs as f64, reference.len() as f64, candidate.len() as f64)
}

fn syllables(word: &str) -> usize {
    let lower: Vec<char> = word.to_lowercase().chars().filter(|c| c.is_alphabetic()).collect();
    if lower.is_empty() {
        return 0;
    }
    let is_vowel = |c: char| "aeiouy".contains(c);
    let mut count = 0;
    let mut prev_vowel = false;
    for &c in &lower {
        let vowel = is_vowel(c);
        if vowel && !prev_vowel {
            count += 1;
        }
        prev_vowel = vowel;
    }
    if lower.len() > 2 && lower.ends_with(&['e']) && !lower.ends_with(&['l', 'e']) && count > 1 {
        count -= 1;
    }
    count.max(1)
}

/// Flesch reading ease of `text`. Empty text scores 0.
pub fn flesch_reading_ease(text: &str) -> f64 {
    let tokens = words(text);
    if tokens.is_empty() {
        return 0.0;
    }
    let sentences = text
        .split(['.', '!', '?'])
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .count()
        .max(1);
    let syllable_total: usize = tokens.iter().map(|w| syllables(w)).sum();

    let words_per_sentence = tokens.len() as f64 / sentences as f64;
    let syllables_per_word = syllable_total as f64 / tokens.len() as f64;
    206.835 - 1.015 * words_per_sentence - 84.6 * syllables_per_word
}

/// Cosine similarity of word-count vectors.
pub fn cosine(a: &[String], b: &[String]) -> f64 {
    let ca = ngram_counts(a, 1);
    let cb = ngram_counts(b, 1);
    let dot: f64 = ca
        .iter()
        .map(|(k, v)| (*v * cb.get(k).copied().unwrap_or(0)) as f64)
        .sum();
    let norm = |c: &HashMap<&[String], usize>| {
        c.values().map(|v| (*v * *v) as f64).sum::<f64>().sqrt()
    };
    let denom = norm(&ca) * norm(&cb);
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(text: &str) -> Vec<String> {
        words(text)
    }

    #[test]
    fn test_identical_texts_score_one() {
        let text = "The committee approved the new budget after a long debate.";
        let m = LexicalScorer.score(text, text);
        assert!((m.similarity_score - 1.0).abs() < 1e-9);
        assert!((m.overlap_scores.rouge1 - 1.0).abs() < 1e-9);
        assert!((m.overlap_scores.rouge2 - 1.0).abs() < 1e-9);
        assert!((m.overlap_scores.rouge_l - 1.0).abs() < 1e-9);
        assert!((m.semantic_similarity_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_texts_score_zero() {
        let m = LexicalScorer.score("alpha beta gamma delta", "one two three four");
        assert_eq!(m.similarity_score, 0.0);
        assert_eq!(m.overlap_scores.rouge1, 0.0);
        assert_eq!(m.semantic_similarity_score, 0.0);
    }

    #[test]
    fn test_rouge_l_subsequence() {
        let score = rouge_l(&w("a b c d"), &w("a c d"));
        // lcs 3, recall 3/4, precision 1
        let expected = 2.0 * 0.75 / 1.75;
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_flesch_simple_text_is_easy() {
        let easy = flesch_reading_ease("The cat sat. The dog ran.");
        let hard = flesch_reading_ease(
            "Institutional accountability necessitates comprehensive organizational transparency.",
        );
        assert!(easy > hard);
        assert_eq!(flesch_reading_ease(""), 0.0);
    }

    #[test]
    fn test_syllables() {
        assert_eq!(syllables("cat"), 1);
        assert_eq!(syllables("table"), 2);
        assert_eq!(syllables("make"), 1);
        assert_eq!(syllables("banana"), 3);
    }
}
