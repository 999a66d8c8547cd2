//! Persisted records.
//!
//! The orchestrator and batch runner only produce records; nothing here
//! is read back. [`JsonlSink`] appends one JSON object per line, with an
//! RFC 3339 `timestamp`, to `results.jsonl`, `timings.jsonl` and
//! `audit.jsonl` under an output directory.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use recast_core::{Explanation, Stage, StageTimings, TextMetrics, Verdict};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to write record: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result row for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentOutcome {
    pub id: String,
    pub original_title: String,
    pub original_text: String,
    /// Text after the first round.
    pub first_round_text: String,
    pub modified_title: String,
    pub modified_text: String,
    /// Verdict on the untouched text.
    pub baseline_verdict: Option<Verdict>,
    pub first_round_verdict: Option<Verdict>,
    pub final_verdict: Option<Verdict>,
    pub rounds_used: usize,
    /// Whether the final text passed as authentic.
    pub success: bool,
    pub initial_metrics: Option<TextMetrics>,
    pub final_metrics: Option<TextMetrics>,
    pub error: Option<String>,
}

impl DocumentOutcome {
    /// Row for a document that could not be processed. Output fields stay empty.
    pub fn failed(
        id: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            id: id.into(),
            original_title: title.into(),
            original_text: text.into(),
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Elapsed seconds per stage for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingRow {
    pub document: String,
    pub stages: BTreeMap<String, f64>,
    pub total_seconds: f64,
}

impl TimingRow {
    pub fn new(document: impl Into<String>, timings: &StageTimings) -> Self {
        Self {
            document: document.into(),
            stages: timings.as_seconds(),
            total_seconds: timings.total().as_secs_f64(),
        }
    }
}

/// One external exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub document: String,
    pub round: usize,
    pub stage: Stage,
    pub request: String,
    /// Last raw reply received.
    pub response: String,
    /// Validated record, when the exchange was structured.
    pub record: Option<serde_json::Value>,
    pub explanation: Option<Explanation>,
}

/// Destination for produced records.
pub trait RecordSink: Send + Sync {
    fn write_result(&self, outcome: &DocumentOutcome) -> Result<(), SinkError>;

    fn write_timing(&self, row: &TimingRow) -> Result<(), SinkError>;

    fn write_audit(&self, record: &AuditRecord) -> Result<(), SinkError>;
}

struct JsonlFile {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlFile {
    fn open(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn append<T: Serialize>(&self, row: &T) -> Result<(), SinkError> {
        let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let record = match serde_json::to_value(row)? {
            serde_json::Value::Object(mut map) => {
                map.insert("timestamp".to_string(), serde_json::Value::String(timestamp));
                serde_json::Value::Object(map)
            }
            other => serde_json::json!({ "timestamp": timestamp, "data": other }),
        };
        let line = serde_json::to_string(&record)?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }
}

/// Appends records to JSONL files under one directory.
pub struct JsonlSink {
    dir: PathBuf,
    results: JsonlFile,
    timings: JsonlFile,
    audit: JsonlFile,
}

impl JsonlSink {
    pub const RESULTS_FILE: &'static str = "results.jsonl";
    pub const TIMINGS_FILE: &'static str = "timings.jsonl";
    pub const AUDIT_FILE: &'static str = "audit.jsonl";

    /// Open (creating if needed) the three files under `dir`.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            results: JsonlFile::open(&dir.join(Self::RESULTS_FILE))?,
            timings: JsonlFile::open(&dir.join(Self::TIMINGS_FILE))?,
            audit: JsonlFile::open(&dir.join(Self::AUDIT_FILE))?,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl RecordSink for JsonlSink {
    fn write_result(&self, outcome: &DocumentOutcome) -> Result<(), SinkError> {
        self.results.append(outcome)
    }

    fn write_timing(&self, row: &TimingRow) -> Result<(), SinkError> {
        self.timings.append(row)
    }

    fn write_audit(&self, record: &AuditRecord) -> Result<(), SinkError> {
        self.audit.append(record)
    }
}

/// Keeps records in memory.
#[derive(Default)]
pub struct MemorySink {
    results: Mutex<Vec<DocumentOutcome>>,
    timings: Mutex<Vec<TimingRow>>,
    audit: Mutex<Vec<AuditRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<DocumentOutcome> {
        self.results.lock().clone()
    }

    pub fn timings(&self) -> Vec<TimingRow> {
        self.timings.lock().clone()
    }

    pub fn audit(&self) -> Vec<AuditRecord> {
        self.audit.lock().clone()
    }
}

impl RecordSink for MemorySink {
    fn write_result(&self, outcome: &DocumentOutcome) -> Result<(), SinkError> {
        self.results.lock().push(outcome.clone());
        Ok(())
    }

    fn write_timing(&self, row: &TimingRow) -> Result<(), SinkError> {
        self.timings.lock().push(row.clone());
        Ok(())
    }

    fn write_audit(&self, record: &AuditRecord) -> Result<(), SinkError> {
        self.audit.lock().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast_core::ProbabilityPair;
    use std::time::Duration;

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_jsonl_sink_writes_stamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::create(dir.path().join("run")).unwrap();

        let mut outcome = DocumentOutcome::failed("3", "T", "Body.", "backend down");
        sink.write_result(&outcome).unwrap();
        outcome.error = None;
        outcome.final_verdict = Some(Verdict::from_probabilities(ProbabilityPair::new(0.6, 0.4)));
        sink.write_result(&outcome).unwrap();

        let lines = read_lines(&sink.dir().join(JsonlSink::RESULTS_FILE));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["error"], "backend down");
        assert_eq!(lines[0]["modified_text"], "");
        assert!(lines[0]["timestamp"].as_str().unwrap().ends_with('Z'));
        assert_eq!(lines[1]["final_verdict"]["label"], "authentic");
    }

    #[test]
    fn test_jsonl_sink_appends_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let mut timings = StageTimings::new();
        timings.record(Stage::Classify, Duration::from_millis(250));

        for _ in 0..2 {
            let sink = JsonlSink::create(dir.path()).unwrap();
            sink.write_timing(&TimingRow::new("1", &timings)).unwrap();
        }

        let lines = read_lines(&dir.path().join(JsonlSink::TIMINGS_FILE));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["stages"]["classify"], 0.25);
        assert_eq!(lines[1]["total_seconds"], 0.25);
    }

    #[test]
    fn test_audit_record_shape() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::create(dir.path()).unwrap();
        sink.write_audit(&AuditRecord {
            document: "9".to_string(),
            round: 2,
            stage: Stage::DetectionFeedback,
            request: "prompt".to_string(),
            response: "reply".to_string(),
            record: Some(serde_json::json!({"feedback": "shorter"})),
            explanation: Some(Explanation::default()),
        })
        .unwrap();

        let lines = read_lines(&dir.path().join(JsonlSink::AUDIT_FILE));
        assert_eq!(lines[0]["stage"], "detection_feedback");
        assert_eq!(lines[0]["round"], 2);
        assert_eq!(lines[0]["record"]["feedback"], "shorter");
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemorySink::new();
        sink.write_result(&DocumentOutcome::failed("1", "", "", "x")).unwrap();
        assert_eq!(sink.results().len(), 1);
        assert!(sink.results()[0].is_failure());
        assert!(sink.audit().is_empty());
    }
}
