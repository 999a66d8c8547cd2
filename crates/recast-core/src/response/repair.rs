//! Ordered repair chain for malformed agent responses.
//!
//! Each transform is a pure function over text or a parsed value.
//! [`parse_response`] runs them in order and stops at the first candidate
//! that satisfies the schema:
//!
//! 1. [`extract_span`]: strip code fences, keep first `{` to last `}`
//! 2. direct parse of the span
//! 3. [`clean_text`] + [`repair_string_literals`], then parse again; a
//!    single-string schema also tries [`rebuild_single_pair`]
//! 4. [`fix_numeric_units`] on numeric list fields
//! 5. [`normalize_feedback`] on feedback list fields
//! 6. [`scan_markdown_feedback`] as a last resort
//!
//! Steps 4 and 5 are applied to every parsed candidate before the schema
//! check, so they also run on well-formed JSON.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};

use super::schema::{FieldKind, ParseOutcome, Schema, SchemaKind};
use crate::types::FeedbackRecord;

lazy_static! {
    /// Markdown code fences, with or without a language tag.
    static ref CODE_FENCE: Regex = Regex::new(r"```[A-Za-z]*").unwrap();

    /// Opening of a single string-valued pair: `{ "key": "...`
    static ref SINGLE_KEY_OPEN: Regex = Regex::new(
        r#"^\{\s*"[A-Za-z_][A-Za-z0-9_]*"\s*:\s*""#
    ).unwrap();

    /// Anything shaped like an object key.
    static ref KEY_PATTERN: Regex = Regex::new(r#""[A-Za-z_][A-Za-z0-9_]*"\s*:"#).unwrap();

    /// A whole single-pair object, value taken greedily up to the last quote.
    static ref SINGLE_PAIR: Regex = Regex::new(
        r#"(?s)^\{\s*"([^"]+)"\s*:\s*"(.*)"\s*\}$"#
    ).unwrap();

    static ref CONTROL_CHARS: Regex = Regex::new(r"[\x00-\x1F\x7F]").unwrap();

    /// `, ,` and `, .` left behind by sloppy list output.
    static ref STRAY_SEPARATOR: Regex = Regex::new(r",\s*[,.]").unwrap();

    static ref TRAILING_COMMA: Regex = Regex::new(r",\s*([}\]])").unwrap();

    static ref REPEATED_WHITESPACE: Regex = Regex::new(r"\s{2,}").unwrap();

    /// `3million`, `45%`, `12 km`
    static ref NUMERIC_UNIT: Regex = Regex::new(r"^(\d+)\s*([A-Za-z%]+)$").unwrap();

    /// `- **Name**: message` and `- **Name:** message`
    static ref MARKDOWN_FEEDBACK: Regex = Regex::new(
        r"^\s*[-*]\s+\*\*(.+?):?\*\*:?\s+(.+)$"
    ).unwrap();
}

/// Remove markdown code fences around a response.
pub fn strip_code_fences(raw: &str) -> String {
    CODE_FENCE.replace_all(raw, "").trim().to_string()
}

fn is_single_open_pair(span: &str) -> bool {
    SINGLE_KEY_OPEN.is_match(span) && KEY_PATTERN.find_iter(span).count() == 1
}

/// Cut the object span out of surrounding prose.
///
/// Returns `None` when there is no `{`. A missing final `}` is synthesized
/// only when the tail is a single key/value pair.
pub fn extract_span(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let tail = &text[start..];

    match tail.rfind('}') {
        Some(end) => Some(tail[..=end].to_string()),
        None if is_single_open_pair(tail) => Some(format!("{}}}", tail.trim_end())),
        None => None,
    }
}

/// Character-level cleanup: triple quotes, smart quotes, control
/// characters, stray separators, trailing commas and runs of whitespace.
pub fn clean_text(span: &str) -> String {
    let text = span
        .replace("\"\"\"", "\"")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    let text = CONTROL_CHARS.replace_all(&text, " ");
    let text = STRAY_SEPARATOR.replace_all(&text, ",");
    let text = TRAILING_COMMA.replace_all(&text, "$1");
    REPEATED_WHITESPACE.replace_all(&text, " ").into_owned()
}

/// Escape quotes that appear inside string literals and separate adjacent
/// literals.
///
/// Inside a string, a `"` only closes it when the next significant
/// character is `,` `}` `]` `:` or the end of input. When it is followed by
/// another quote the string is closed and a comma inserted. Any other quote
/// is escaped. A string still open at the end is closed before the final
/// brace.
pub fn repair_string_literals(text: &str) -> String {
    close_literals(text).0
}

/// Same as [`repair_string_literals`], also reporting whether a string was
/// still open at the end of the span.
fn close_literals(text: &str) -> (String, bool) {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            i += 1;
            continue;
        }

        match c {
            '\\' => {
                out.push(c);
                if let Some(&escaped) = chars.get(i + 1) {
                    out.push(escaped);
                    i += 1;
                }
            }
            '"' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                match next {
                    None | Some(',') | Some('}') | Some(']') | Some(':') => {
                        in_string = false;
                        out.push('"');
                    }
                    Some('"') => {
                        in_string = false;
                        out.push_str("\",");
                    }
                    Some(_) => out.push_str("\\\""),
                }
            }
            _ => out.push(c),
        }
        i += 1;
    }

    if in_string {
        let trimmed = out.trim_end();
        let body = trimmed.strip_suffix('}').unwrap_or(trimmed).trim_end();
        out = format!("{body}\"}}");
    }

    (out, in_string)
}

/// Non-blank text after the last `}`.
fn has_trailing_text(text: &str) -> bool {
    text.rfind('}')
        .is_some_and(|end| !text[end + 1..].trim().is_empty())
}

/// Rebuild `{ "key": "value" }` when the value holds unescaped quotes.
pub fn rebuild_single_pair(text: &str) -> Option<Value> {
    let caps = SINGLE_PAIR.captures(text.trim())?;
    let key = caps.get(1)?.as_str();
    let value = caps.get(2)?.as_str().trim();
    Some(json!({ key: value }))
}

/// Reformat `"<digits><unit>"` entries of numeric list fields as
/// `"<digits> <unit>"`. Bare numbers are stringified, other strings trimmed.
pub fn fix_numeric_units(value: &mut Value, kind: SchemaKind) {
    let Some(object) = value.as_object_mut() else {
        return;
    };

    for key in kind.keys_of(FieldKind::NumericTextList) {
        let Some(Value::Array(items)) = object.get_mut(key) else {
            continue;
        };
        for item in items.iter_mut() {
            let fixed = match item {
                Value::String(s) => {
                    let trimmed = s.trim();
                    match NUMERIC_UNIT.captures(trimmed) {
                        Some(caps) => format!("{} {}", &caps[1], &caps[2]),
                        None => trimmed.to_string(),
                    }
                }
                Value::Number(n) => n.to_string(),
                _ => continue,
            };
            *item = Value::String(fixed);
        }
    }
}

fn canonical_record(agent: &str, message: String) -> Value {
    json!({ "agent": agent, "message": message })
}

fn value_as_message(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn normalize_feedback_item(item: Value) -> Option<Value> {
    match item {
        Value::String(message) => Some(canonical_record(FeedbackRecord::UNKNOWN_AGENT, message)),
        Value::Object(map) => {
            if let Some(message) = map.get("message") {
                let agent = map
                    .get("agent")
                    .and_then(Value::as_str)
                    .unwrap_or(FeedbackRecord::UNKNOWN_AGENT);
                Some(canonical_record(agent, value_as_message(message)))
            } else if map.len() == 1 {
                let (agent, message) = map.into_iter().next()?;
                Some(canonical_record(&agent, value_as_message(&message)))
            } else {
                None
            }
        }
        Value::Null => None,
        other => Some(canonical_record(
            FeedbackRecord::UNKNOWN_AGENT,
            other.to_string(),
        )),
    }
}

fn normalize_feedback_mapping(map: Map<String, Value>) -> Vec<Value> {
    if map.contains_key("message") {
        return normalize_feedback_item(Value::Object(map)).into_iter().collect();
    }
    map.into_iter()
        .map(|(agent, message)| canonical_record(&agent, value_as_message(&message)))
        .collect()
}

/// Coerce feedback list fields into canonical `[{agent, message}]` records.
///
/// Accepts a list of strings, a single string, a `{agent: message}` mapping
/// or a mixed list. Records without a recognizable agent get `"Unknown"`.
pub fn normalize_feedback(value: &mut Value, kind: SchemaKind) {
    let Some(object) = value.as_object_mut() else {
        return;
    };

    for key in kind.keys_of(FieldKind::FeedbackList) {
        let Some(field) = object.get_mut(key) else {
            continue;
        };
        let records = match field.take() {
            Value::Array(items) => items
                .into_iter()
                .filter_map(normalize_feedback_item)
                .collect(),
            Value::String(message) => {
                vec![canonical_record(FeedbackRecord::UNKNOWN_AGENT, message)]
            }
            Value::Object(map) => normalize_feedback_mapping(map),
            other => {
                *field = other;
                continue;
            }
        };
        *field = Value::Array(records);
    }
}

/// Build feedback records from `- **Name**: message` lines.
///
/// Returns `None` when the schema has no feedback list or nothing matched.
pub fn scan_markdown_feedback(text: &str, kind: SchemaKind) -> Option<Value> {
    let key = kind.keys_of(FieldKind::FeedbackList).next()?;

    let records: Vec<Value> = text
        .lines()
        .filter_map(|line| MARKDOWN_FEEDBACK.captures(line))
        .map(|caps| canonical_record(caps[1].trim(), caps[2].trim().to_string()))
        .collect();

    if records.is_empty() {
        return None;
    }
    Some(json!({ key: records }))
}

fn finish(mut candidate: Value, schema: &Schema) -> ParseOutcome {
    fix_numeric_units(&mut candidate, schema.kind());
    normalize_feedback(&mut candidate, schema.kind());
    schema.check(&candidate)
}

/// Run the repair chain over a raw response.
///
/// Returns the first candidate that passes the schema, or `Invalid` with
/// the most specific error seen along the way.
pub fn parse_response(raw: &str, schema: &Schema) -> ParseOutcome {
    let stripped = strip_code_fences(raw);
    let mut last_error = "no JSON object found in response".to_string();

    if let Some(span) = extract_span(&stripped) {
        match serde_json::from_str::<Value>(&span) {
            Ok(candidate) => match finish(candidate, schema) {
                ParseOutcome::Valid(record) => return ParseOutcome::Valid(record),
                ParseOutcome::Invalid(e) => last_error = e,
            },
            Err(e) => last_error = format!("invalid JSON: {e}"),
        }

        let cleaned = clean_text(&span);
        let (repaired, closed_open_string) = close_literals(&cleaned);
        // A brace inside the value was taken as the end of the object.
        let cut_short = closed_open_string && has_trailing_text(&stripped);
        if cut_short {
            last_error = "response ends inside a string value".to_string();
        } else if let Ok(candidate) = serde_json::from_str::<Value>(&repaired) {
            match finish(candidate, schema) {
                ParseOutcome::Valid(record) => {
                    tracing::debug!(schema = schema.name(), "response repaired by normalization");
                    return ParseOutcome::Valid(record);
                }
                ParseOutcome::Invalid(e) => last_error = e,
            }
        }

        if !cut_short && schema.kind().single_text_key().is_some() {
            if let Some(candidate) = rebuild_single_pair(&cleaned) {
                if let ParseOutcome::Valid(record) = finish(candidate, schema) {
                    tracing::debug!(schema = schema.name(), "response rebuilt as single pair");
                    return ParseOutcome::Valid(record);
                }
            }
        }
    }

    if let Some(candidate) = scan_markdown_feedback(&stripped, schema.kind()) {
        if let ParseOutcome::Valid(record) = finish(candidate, schema) {
            tracing::debug!(schema = schema.name(), "feedback recovered from markdown");
            return ParseOutcome::Valid(record);
        }
    }

    ParseOutcome::Invalid(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Record;
    use proptest::prelude::*;

    #[test]
    fn test_extract_span_from_prose() {
        assert_eq!(
            extract_span(r#"Sure! {"title": "x"} Hope that helps."#).as_deref(),
            Some(r#"{"title": "x"}"#)
        );
        assert_eq!(extract_span("no object here"), None);
    }

    #[test]
    fn test_extract_span_synthesizes_brace_for_single_pair() {
        assert_eq!(
            extract_span(r#"{ "feedback": "tighten the lede""#).as_deref(),
            Some(r#"{ "feedback": "tighten the lede"}"#)
        );
        // Two keys and no brace is not repaired
        assert_eq!(extract_span(r#"{ "a": "x", "b": "y""#), None);
    }

    #[test]
    fn test_strip_code_fences() {
        let raw = "```json\n{\"title\": \"x\"}\n```";
        assert_eq!(strip_code_fences(raw), "{\"title\": \"x\"}");
    }

    #[test]
    fn test_clean_text() {
        let cleaned = clean_text("{\u{201C}a\u{201D}:\n\"b\",, }");
        assert_eq!(cleaned, "{\"a\": \"b\"}");
    }

    #[test]
    fn test_repair_string_literals_escapes_inner_quotes() {
        let repaired = repair_string_literals(r#"{"t": "A said "hi" to B"}"#);
        assert_eq!(repaired, r#"{"t": "A said \"hi\" to B"}"#);
    }

    #[test]
    fn test_repair_string_literals_inserts_missing_comma() {
        let repaired = repair_string_literals(r#"{"k": ["one" "two"]}"#);
        let parsed: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(parsed, json!({ "k": ["one", "two"] }));
    }

    #[test]
    fn test_inner_quotes_without_closing_quote() {
        let raw = r#"The result is: { "modified_text": "A said "hello" to B }"#;
        let outcome = parse_response(raw, &Schema::modified_text("orig"));
        let record = outcome.into_record().unwrap();
        assert_eq!(record.text("modified_text"), Some(r#"A said "hello" to B"#));
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"modified_text":"A said \"hello\" to B"}"#
        );
    }

    #[test]
    fn test_inner_quotes_without_closing_brace() {
        let raw = r#"The result is: { "modified_text": "A said "hello" to B"#;
        let record = parse_response(raw, &Schema::modified_text("orig"))
            .into_record()
            .unwrap();
        assert_eq!(record.text("modified_text"), Some(r#"A said "hello" to B"#));
    }

    #[test]
    fn test_brace_inside_unterminated_value_is_invalid() {
        let raw = r#"{"modified_text": "use {x} here"#;
        let outcome = parse_response(raw, &Schema::modified_text("FB"));
        assert_eq!(
            outcome,
            ParseOutcome::Invalid("response ends inside a string value".to_string())
        );

        // Prose after a complete object is still fine
        let raw = r#"{"modified_text": "use {x} here"} as requested"#;
        let record = parse_response(raw, &Schema::modified_text("FB"))
            .into_record()
            .unwrap();
        assert_eq!(record.text("modified_text"), Some("use {x} here"));
    }

    #[test]
    fn test_feedback_strings_normalized() {
        let raw = r#"{"feedback": ["fix sentence 1", "fix numbers"]}"#;
        let record = parse_response(raw, &Schema::evaluator_feedback())
            .into_record()
            .unwrap();
        assert_eq!(
            record.to_value(),
            json!({ "feedback": [
                { "agent": "Unknown", "message": "fix sentence 1" },
                { "agent": "Unknown", "message": "fix numbers" }
            ]})
        );
    }

    #[test]
    fn test_feedback_mapping_and_string_normalized() {
        let mut value = json!({ "feedback": { "numeric_rewriter": "check the dates" } });
        normalize_feedback(&mut value, SchemaKind::EvaluatorFeedback);
        assert_eq!(
            value,
            json!({ "feedback": [{ "agent": "numeric_rewriter", "message": "check the dates" }] })
        );

        let mut value = json!({ "feedback": "shorter please" });
        normalize_feedback(&mut value, SchemaKind::EvaluatorFeedback);
        assert_eq!(
            value,
            json!({ "feedback": [{ "agent": "Unknown", "message": "shorter please" }] })
        );
    }

    #[test]
    fn test_feedback_mixed_list() {
        let mut value = json!({ "feedback": [
            { "message": "no agent" },
            "plain",
            { "agent": "style_transformer", "message": "ok" },
            null
        ]});
        normalize_feedback(&mut value, SchemaKind::EvaluatorFeedback);
        let items = value["feedback"].as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["agent"], "Unknown");
        assert_eq!(items[1]["message"], "plain");
        assert_eq!(items[2]["agent"], "style_transformer");
    }

    #[test]
    fn test_plain_feedback_schema_untouched_by_feedback_normalizer() {
        let mut value = json!({ "feedback": "keep as string" });
        normalize_feedback(&mut value, SchemaKind::Feedback);
        assert_eq!(value, json!({ "feedback": "keep as string" }));
    }

    #[test]
    fn test_numeric_units() {
        let mut value = json!({
            "key_sentences": ["A."],
            "numbers": ["3million", "2024", " 45% ", 12, "12 km"]
        });
        fix_numeric_units(&mut value, SchemaKind::KeySentences);
        assert_eq!(
            value["numbers"],
            json!(["3 million", "2024", "45 %", "12", "12 km"])
        );
    }

    #[test]
    fn test_markdown_feedback_last_resort() {
        let raw = "Here is my review:\n- **style_transformer**: vary sentence length\n- **numeric_rewriter:** round the totals\nThanks";
        let record = parse_response(raw, &Schema::evaluator_feedback())
            .into_record()
            .unwrap();
        let feedback = record.feedback("feedback");
        assert_eq!(feedback.len(), 2);
        assert_eq!(feedback[0].agent, "style_transformer");
        assert_eq!(feedback[1].agent, "numeric_rewriter");
        assert_eq!(feedback[1].message, "round the totals");
    }

    #[test]
    fn test_unrepairable_is_invalid() {
        let outcome = parse_response("I cannot help with that.", &Schema::title("T"));
        assert!(matches!(outcome, ParseOutcome::Invalid(_)));

        let outcome = parse_response(r#"{"headline": "x"}"#, &Schema::title("T"));
        assert!(matches!(outcome, ParseOutcome::Invalid(_)));
    }

    #[test]
    fn test_code_fenced_key_sentences() {
        let raw = "```json\n{\"key_sentences\": [\"First.\"], \"numbers\": [\"5km\"]}\n```";
        let record = parse_response(raw, &Schema::key_sentences())
            .into_record()
            .unwrap();
        assert_eq!(record.text_list("key_sentences"), vec!["First."]);
        assert_eq!(record.text_list("numbers"), vec!["5 km"]);
    }

    proptest! {
        #[test]
        fn prop_valid_text_record_is_fixed_point(text in "\\PC{0,80}") {
            let schema = Schema::modified_text("fallback");
            let record = Record::new().with("modified_text", text);
            let raw = serde_json::to_string(&record).unwrap();
            let outcome = parse_response(&raw, &schema);
            prop_assert_eq!(outcome, ParseOutcome::Valid(record));
        }

        #[test]
        fn prop_valid_feedback_record_is_fixed_point(
            entries in proptest::collection::vec(("[a-z_]{1,12}", "\\PC{0,40}"), 0..4)
        ) {
            let schema = Schema::evaluator_feedback();
            let items: Vec<FeedbackRecord> = entries
                .into_iter()
                .map(|(agent, message)| FeedbackRecord::new(agent, message))
                .collect();
            let record = Record::new().with("feedback", json!(items));
            let raw = serde_json::to_string(&record).unwrap();
            prop_assert_eq!(parse_response(&raw, &schema), ParseOutcome::Valid(record));
        }
    }
}
