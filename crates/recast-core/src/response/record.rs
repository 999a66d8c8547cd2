//! Schema-conformant records produced by the validator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::FeedbackRecord;

/// A structured response whose keys match a [`Schema`](super::Schema).
///
/// Records are only produced by `Schema::check` (after every required key
/// was found with the right type) or as a schema fallback, so the typed
/// accessors below can assume the shape of the owning schema.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// String value of a text field.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Integer value; whole floats such as `3.0` are accepted.
    pub fn integer(&self, key: &str) -> Option<i64> {
        let value = self.0.get(key)?;
        value.as_i64().or_else(|| {
            value
                .as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        })
    }

    /// String items of a list field. Non-string items are skipped.
    pub fn text_list(&self, key: &str) -> Vec<String> {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Feedback records of a canonical feedback list field.
    pub fn feedback(&self, key: &str) -> Vec<FeedbackRecord> {
        self.0
            .get(key)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_accessors() {
        let record = Record::new()
            .with("modified_text", "hello")
            .with("choice", json!(3.0))
            .with("numbers", json!(["2024", 7, "3 million"]))
            .with(
                "feedback",
                json!([{ "agent": "style_transformer", "message": "shorter" }]),
            );

        assert_eq!(record.text("modified_text"), Some("hello"));
        assert_eq!(record.integer("choice"), Some(3));
        assert_eq!(record.text_list("numbers"), vec!["2024", "3 million"]);
        assert_eq!(record.feedback("feedback")[0].message, "shorter");
        assert!(record.text("missing").is_none());
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let record = Record::new().with("title", "New");
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"title":"New"}"#);
    }
}
