//! # recast-core
//!
//! Deterministic building blocks for adversarial document revision.
//!
//! This crate holds everything in the revision loop that does not talk to
//! an external collaborator:
//! - response schemas and the JSON repair chain
//! - retry bookkeeping for corrective re-requests
//! - chunk averaging for long-document classification
//! - ranking of attribution scores into salient tokens and phrases
//! - local sentence splicing and a reference lexical metrics scorer
//!
//! ## Key Guarantees
//!
//! 1. **No I/O**: every function is pure
//! 2. **Never partial**: a response either matches its schema exactly or is
//!    rejected as a whole
//! 3. **Deterministic fallbacks**: every schema carries the record used
//!    when repair and retries are exhausted
//!
//! ## Example
//!
//! ```rust,ignore
//! use recast_core::response::{parse_response, Schema};
//!
//! let schema = Schema::modified_text("original text");
//! let outcome = parse_response(r#"Here: {"modified_text": "new text"}"#, &schema);
//! assert!(outcome.is_valid());
//! ```

pub mod chunking;
pub mod metrics;
pub mod response;
pub mod salience;
pub mod splice;
pub mod types;

pub use chunking::{average_pairs, chunk_tokens};
pub use metrics::{LexicalScorer, MetricsScorer};
pub use response::{ParseOutcome, Record, RetryState, Schema, SchemaKind};
pub use salience::{Attribution, Explanation};
pub use splice::{first_sentence, splice_first};
pub use types::{
    Document, FeedbackRecord, Label, OverlapScores, ProbabilityPair, RoundRecord, Stage,
    StageTimings, TextMetrics, Verdict,
};
