//! Ranking of token attributions into salient tokens and phrases.
//!
//! Scores come from the runtime explainer; this module only filters,
//! groups and orders them.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Default number of tokens kept.
pub const DEFAULT_TOP_TOKENS: usize = 10;
/// Default number of phrases kept.
pub const DEFAULT_TOP_PHRASES: usize = 3;
/// Minimum score for a token to extend a phrase.
pub const DEFAULT_PHRASE_THRESHOLD: f64 = 0.001;

/// English stop words.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "across", "after", "afterwards", "again", "against", "all", "almost",
    "alone", "along", "already", "also", "although", "always", "am", "among", "amongst",
    "amoungst", "amount", "an", "and", "another", "any", "anyhow", "anyone", "anything", "anyway",
    "anywhere", "are", "around", "as", "at", "back", "be", "became", "because", "become",
    "becomes", "becoming", "been", "before", "beforehand", "behind", "being", "below", "beside",
    "besides", "between", "beyond", "bill", "both", "bottom", "but", "by", "call", "can",
    "cannot", "cant", "co", "con", "could", "couldnt", "cry", "de", "describe", "detail", "do",
    "done", "down", "due", "during", "each", "eg", "eight", "either", "eleven", "else",
    "elsewhere", "empty", "enough", "etc", "even", "ever", "every", "everyone", "everything",
    "everywhere", "except", "few", "fifteen", "fifty", "fill", "find", "fire", "first", "five",
    "for", "former", "formerly", "forty", "found", "four", "from", "front", "full", "further",
    "get", "give", "go", "had", "has", "hasnt", "have", "he", "hence", "her", "here",
    "hereafter", "hereby", "herein", "hereupon", "hers", "herself", "him", "himself", "his",
    "how", "however", "hundred", "i", "ie", "if", "in", "inc", "indeed", "interest", "into",
    "is", "it", "its", "itself", "keep", "last", "latter", "latterly", "least", "less", "ltd",
    "made", "many", "may", "me", "meanwhile", "might", "mill", "mine", "more", "moreover",
    "most", "mostly", "move", "much", "must", "my", "myself", "name", "namely", "neither",
    "never", "nevertheless", "next", "nine", "no", "nobody", "none", "noone", "nor", "not",
    "nothing", "now", "nowhere", "of", "off", "often", "on", "once", "one", "only", "onto",
    "or", "other", "others", "otherwise", "our", "ours", "ourselves", "out", "over", "own",
    "part", "per", "perhaps", "please", "put", "rather", "re", "same", "see", "seem", "seemed",
    "seeming", "seems", "serious", "several", "she", "should", "show", "side", "since",
    "sincere", "six", "sixty", "so", "some", "somehow", "someone", "something", "sometime",
    "sometimes", "somewhere", "still", "such", "system", "take", "ten", "than", "that", "the",
    "their", "them", "themselves", "then", "thence", "there", "thereafter", "thereby",
    "therefore", "therein", "thereupon", "these", "they", "thick", "thin", "third", "this",
    "those", "though", "three", "through", "throughout", "thru", "thus", "to", "together",
    "too", "top", "toward", "towards", "twelve", "twenty", "two", "un", "under", "until", "up",
    "upon", "us", "very", "via", "was", "we", "well", "were", "what", "whatever", "when",
    "whence", "whenever", "where", "whereafter", "whereas", "whereby", "wherein", "whereupon",
    "wherever", "whether", "which", "while", "whither", "who", "whoever", "whole", "whom",
    "whose", "why", "will", "with", "within", "without", "would", "yet", "you", "your", "yours",
    "yourself", "yourselves",
];

fn stop_words() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOP_WORDS.iter().copied().collect())
}

/// A token or phrase with its contribution toward the predicted class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub text: String,
    pub score: f64,
}

impl Attribution {
    pub fn new(text: impl Into<String>, score: f64) -> Self {
        Self {
            text: text.into(),
            score,
        }
    }
}

/// Ranked salient tokens and phrases for one text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub tokens: Vec<Attribution>,
    pub phrases: Vec<Attribution>,
}

impl Explanation {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && self.phrases.is_empty()
    }

    /// Plain-text rendering embedded in feedback requests.
    pub fn describe(&self) -> String {
        let join = |items: &[Attribution]| {
            items
                .iter()
                .map(|a| format!("{} ({:.4})", a.text, a.score))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "Most influential words: {}\nMost influential phrases: {}",
            join(&self.tokens),
            join(&self.phrases)
        )
    }
}

/// Lowercase and drop everything but letters, digits and underscores.
pub fn normalize_token(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn is_stop_word(token: &str) -> bool {
    stop_words().contains(normalize_token(token).as_str())
}

/// Alphabetic, longer than one character and not a stop word.
pub fn is_salient_token(token: &str) -> bool {
    let normalized = normalize_token(token);
    normalized.chars().count() > 1
        && normalized.chars().all(char::is_alphabetic)
        && !stop_words().contains(normalized.as_str())
}

fn sort_descending(items: &mut [Attribution]) {
    items.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// Positive-scoring salient tokens, highest first, at most `top_k`.
pub fn rank_tokens(scored: &[(String, f64)], top_k: usize) -> Vec<Attribution> {
    let mut ranked: Vec<Attribution> = scored
        .iter()
        .filter(|(token, score)| *score > 0.0 && is_salient_token(token))
        .map(|(token, score)| Attribution::new(normalize_token(token), *score))
        .collect();
    sort_descending(&mut ranked);
    ranked.truncate(top_k);
    ranked
}

/// Contiguous runs of above-threshold non-stop-word tokens, scored by
/// their sum, highest first, at most `top_k`.
pub fn rank_phrases(scored: &[(String, f64)], threshold: f64, top_k: usize) -> Vec<Attribution> {
    let mut phrases = Vec::new();
    let mut words: Vec<String> = Vec::new();
    let mut total = 0.0;

    for (token, score) in scored {
        let cleaned = normalize_token(token);
        let extends = *score > threshold
            && !cleaned.is_empty()
            && !stop_words().contains(cleaned.as_str());

        if extends {
            words.push(cleaned);
            total += score;
        } else if !words.is_empty() {
            phrases.push(Attribution::new(words.join(" "), total));
            words.clear();
            total = 0.0;
        }
    }
    if !words.is_empty() {
        phrases.push(Attribution::new(words.join(" "), total));
    }

    sort_descending(&mut phrases);
    phrases.truncate(top_k);
    phrases
}
