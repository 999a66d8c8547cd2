//! Response schemas and their type predicates.
//!
//! Every schema is a fixed set of required keys with primitive or
//! list-of-primitive value types. The predicates are expressed as JSON
//! Schema documents, compiled once per kind and reused.

use serde_json::{json, Map, Value};
use std::sync::OnceLock;

use super::record::Record;
use crate::types::FeedbackRecord;

/// Value type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A single string.
    Text,
    /// A single integer.
    Integer,
    /// A list of strings.
    TextList,
    /// A list of strings holding numbers with optional units ("3 million").
    NumericTextList,
    /// A list of `{agent, message}` feedback records.
    FeedbackList,
}

/// A required key and its value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: &'static str,
    pub kind: FieldKind,
}

const fn field(key: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { key, kind }
}

const MODIFIED_TEXT_FIELDS: &[FieldSpec] = &[field("modified_text", FieldKind::Text)];
const MODIFIED_SENTENCE_FIELDS: &[FieldSpec] = &[field("modified_sentence", FieldKind::Text)];
const FEEDBACK_FIELDS: &[FieldSpec] = &[field("feedback", FieldKind::Text)];
const TITLE_FIELDS: &[FieldSpec] = &[field("title", FieldKind::Text)];
const KEY_SENTENCES_FIELDS: &[FieldSpec] = &[
    field("key_sentences", FieldKind::TextList),
    field("numbers", FieldKind::NumericTextList),
];
const EVALUATOR_FIELDS: &[FieldSpec] = &[field("feedback", FieldKind::FeedbackList)];
const CHOICE_FIELDS: &[FieldSpec] = &[field("choice", FieldKind::Integer)];

/// The fixed set of response shapes the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    ModifiedText,
    ModifiedSentence,
    Feedback,
    Title,
    KeySentences,
    EvaluatorFeedback,
    TechniqueChoice,
}

impl SchemaKind {
    pub const ALL: [SchemaKind; 7] = [
        SchemaKind::ModifiedText,
        SchemaKind::ModifiedSentence,
        SchemaKind::Feedback,
        SchemaKind::Title,
        SchemaKind::KeySentences,
        SchemaKind::EvaluatorFeedback,
        SchemaKind::TechniqueChoice,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SchemaKind::ModifiedText => "modified_text",
            SchemaKind::ModifiedSentence => "modified_sentence",
            SchemaKind::Feedback => "feedback",
            SchemaKind::Title => "title",
            SchemaKind::KeySentences => "key_sentences",
            SchemaKind::EvaluatorFeedback => "evaluator_feedback",
            SchemaKind::TechniqueChoice => "technique_choice",
        }
    }

    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            SchemaKind::ModifiedText => MODIFIED_TEXT_FIELDS,
            SchemaKind::ModifiedSentence => MODIFIED_SENTENCE_FIELDS,
            SchemaKind::Feedback => FEEDBACK_FIELDS,
            SchemaKind::Title => TITLE_FIELDS,
            SchemaKind::KeySentences => KEY_SENTENCES_FIELDS,
            SchemaKind::EvaluatorFeedback => EVALUATOR_FIELDS,
            SchemaKind::TechniqueChoice => CHOICE_FIELDS,
        }
    }

    /// Example of the exact shape, embedded in correction requests.
    pub fn expected_format(self) -> &'static str {
        match self {
            SchemaKind::ModifiedText => r#"{ "modified_text": "Modified version of the text" }"#,
            SchemaKind::ModifiedSentence => {
                r#"{ "modified_sentence": "Your modified sentence here" }"#
            }
            SchemaKind::Feedback => r#"{ "feedback": "Your feedback here" }"#,
            SchemaKind::Title => r#"{ "title": "New title here" }"#,
            SchemaKind::KeySentences => {
                r#"{ "key_sentences": ["Sentence 1.", "Sentence 2."], "numbers": ["2024", "3 million"] }"#
            }
            SchemaKind::EvaluatorFeedback => {
                r#"{ "feedback": [ { "agent": "AgentName", "message": "Feedback message." } ] }"#
            }
            SchemaKind::TechniqueChoice => r#"{ "choice": 1 }"#,
        }
    }

    /// The only key, when the schema is a single string field.
    pub fn single_text_key(self) -> Option<&'static str> {
        match self.fields() {
            [only] if only.kind == FieldKind::Text => Some(only.key),
            _ => None,
        }
    }

    /// Keys of all fields with the given kind.
    pub fn keys_of(self, kind: FieldKind) -> impl Iterator<Item = &'static str> {
        self.fields()
            .iter()
            .filter(move |f| f.kind == kind)
            .map(|f| f.key)
    }

    /// JSON Schema document for this kind.
    pub fn json_schema(self) -> Value {
        let mut properties = Map::new();
        for f in self.fields() {
            properties.insert(f.key.to_string(), field_schema(f.kind));
        }
        let required: Vec<&str> = self.fields().iter().map(|f| f.key).collect();

        json!({
            "type": "object",
            "required": required,
            "properties": properties,
        })
    }

    fn index(self) -> usize {
        match self {
            SchemaKind::ModifiedText => 0,
            SchemaKind::ModifiedSentence => 1,
            SchemaKind::Feedback => 2,
            SchemaKind::Title => 3,
            SchemaKind::KeySentences => 4,
            SchemaKind::EvaluatorFeedback => 5,
            SchemaKind::TechniqueChoice => 6,
        }
    }
}

fn field_schema(kind: FieldKind) -> Value {
    match kind {
        FieldKind::Text => json!({ "type": "string" }),
        FieldKind::Integer => json!({ "type": "integer" }),
        FieldKind::TextList | FieldKind::NumericTextList => json!({
            "type": "array",
            "items": { "type": "string" }
        }),
        FieldKind::FeedbackList => json!({
            "type": "array",
            "items": {
                "type": "object",
                "required": ["agent", "message"],
                "properties": {
                    "agent": { "type": "string" },
                    "message": { "type": "string" }
                }
            }
        }),
    }
}

/// Compiled validators, one slot per `SchemaKind` (initialized once, reused).
static COMPILED: [OnceLock<Result<jsonschema::Validator, String>>; 7] =
    [const { OnceLock::new() }; 7];

fn compiled(kind: SchemaKind) -> Result<&'static jsonschema::Validator, String> {
    let result = COMPILED[kind.index()].get_or_init(|| {
        jsonschema::options()
            .build(&kind.json_schema())
            .map_err(|e| format!("Failed to compile {} schema: {}", kind.name(), e))
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(e.clone()),
    }
}

/// Result of checking a candidate against a schema.
///
/// Never partially valid: a missing or mistyped key makes the whole
/// candidate `Invalid`.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Valid(Record),
    Invalid(String),
}

impl ParseOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ParseOutcome::Valid(_))
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            ParseOutcome::Valid(record) => Some(record),
            ParseOutcome::Invalid(_) => None,
        }
    }
}

/// A schema kind bound to the fallback record used when repair and
/// retries are exhausted.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    kind: SchemaKind,
    fallback: Record,
}

impl Schema {
    /// `{modified_text}`; falls back to the input text unchanged.
    pub fn modified_text(original: impl Into<String>) -> Self {
        Self::with_fallback(
            SchemaKind::ModifiedText,
            Record::new().with("modified_text", original.into()),
        )
    }

    /// `{modified_sentence}`; falls back to the sentence being modified.
    pub fn modified_sentence(sentence: impl Into<String>) -> Self {
        Self::with_fallback(
            SchemaKind::ModifiedSentence,
            Record::new().with("modified_sentence", sentence.into()),
        )
    }

    /// `{feedback: string}`; falls back to a caller-supplied instruction.
    pub fn feedback(default_feedback: impl Into<String>) -> Self {
        Self::with_fallback(
            SchemaKind::Feedback,
            Record::new().with("feedback", default_feedback.into()),
        )
    }

    /// `{title}`; falls back to the original title.
    pub fn title(original_title: impl Into<String>) -> Self {
        Self::with_fallback(
            SchemaKind::Title,
            Record::new().with("title", original_title.into()),
        )
    }

    /// `{key_sentences, numbers}`; falls back to empty lists.
    pub fn key_sentences() -> Self {
        Self::with_fallback(
            SchemaKind::KeySentences,
            Record::new()
                .with("key_sentences", json!([]))
                .with("numbers", json!([])),
        )
    }

    /// `{feedback: [{agent, message}]}`; falls back to a sentinel message.
    pub fn evaluator_feedback() -> Self {
        let sentinel = FeedbackRecord::unknown("Fallback feedback: invalid format.");
        Self::with_fallback(
            SchemaKind::EvaluatorFeedback,
            Record::new().with("feedback", json!([sentinel])),
        )
    }

    /// `{choice}`; falls back to technique 1.
    pub fn technique_choice() -> Self {
        Self::with_fallback(SchemaKind::TechniqueChoice, Record::new().with("choice", 1))
    }

    pub fn with_fallback(kind: SchemaKind, fallback: Record) -> Self {
        Self { kind, fallback }
    }

    pub fn kind(&self) -> SchemaKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn expected_format(&self) -> &'static str {
        self.kind.expected_format()
    }

    pub fn fallback(&self) -> &Record {
        &self.fallback
    }

    /// Check a parsed candidate and project it onto the schema's keys.
    ///
    /// Extra keys are dropped so a valid record has exactly the schema's
    /// shape.
    pub fn check(&self, value: &Value) -> ParseOutcome {
        let validator = match compiled(self.kind) {
            Ok(v) => v,
            Err(e) => return ParseOutcome::Invalid(e),
        };

        let errors: Vec<String> = validator
            .iter_errors(value)
            .map(|e| format!("{} at '{}'", e, e.instance_path))
            .collect();
        if !errors.is_empty() {
            return ParseOutcome::Invalid(errors.join("; "));
        }

        let Some(object) = value.as_object() else {
            return ParseOutcome::Invalid("expected a JSON object".to_string());
        };

        let mut record = Record::new();
        for f in self.kind.fields() {
            if let Some(v) = object.get(f.key) {
                record = record.with(f.key, v.clone());
            }
        }
        ParseOutcome::Valid(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_compiles() {
        for kind in SchemaKind::ALL {
            assert!(compiled(kind).is_ok(), "{} failed to compile", kind.name());
        }
    }

    #[test]
    fn test_every_fallback_satisfies_its_schema() {
        let schemas = [
            Schema::modified_text("text"),
            Schema::modified_sentence("sentence"),
            Schema::feedback("revise"),
            Schema::title("title"),
            Schema::key_sentences(),
            Schema::evaluator_feedback(),
            Schema::technique_choice(),
        ];
        for schema in schemas {
            let outcome = schema.check(&schema.fallback().to_value());
            assert_eq!(outcome, ParseOutcome::Valid(schema.fallback().clone()));
        }
    }

    #[test]
    fn test_missing_key_is_wholly_invalid() {
        let schema = Schema::key_sentences();
        let outcome = schema.check(&json!({ "key_sentences": ["A."] }));
        assert!(!outcome.is_valid());
    }

    #[test]
    fn test_mistyped_value_is_invalid() {
        let schema = Schema::modified_text("orig");
        assert!(!schema.check(&json!({ "modified_text": 42 })).is_valid());

        let schema = Schema::technique_choice();
        assert!(!schema.check(&json!({ "choice": "two" })).is_valid());
        assert!(schema.check(&json!({ "choice": 2 })).is_valid());
    }

    #[test]
    fn test_extra_keys_are_projected_away() {
        let schema = Schema::title("old");
        let outcome = schema.check(&json!({ "title": "new", "note": "extra" }));
        let record = outcome.into_record().unwrap();
        assert_eq!(record.len(), 1);
        assert_eq!(record.text("title"), Some("new"));
    }

    #[test]
    fn test_feedback_items_need_agent_and_message() {
        let schema = Schema::evaluator_feedback();
        assert!(!schema.check(&json!({ "feedback": [{ "agent": "x" }] })).is_valid());
        assert!(schema
            .check(&json!({ "feedback": [{ "agent": "x", "message": "y" }] }))
            .is_valid());
    }

    #[test]
    fn test_single_text_key() {
        assert_eq!(SchemaKind::ModifiedText.single_text_key(), Some("modified_text"));
        assert_eq!(SchemaKind::KeySentences.single_text_key(), None);
        assert_eq!(SchemaKind::TechniqueChoice.single_text_key(), None);
    }
}
