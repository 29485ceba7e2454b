//! Append-only JSON log of evaluation runs.
//!
//! The log is a JSON array of run objects keyed by `"Custom Prompt"`. A run
//! whose prompt is already present is not written again: the first write
//! wins. Every append rewrites the whole file through a temp file and rename.

use super::evaluator::{Averages, EvaluationRun};
use crate::error::{RagEvalError, Result};
use crate::persistence::write_atomic;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default filename for the result log.
pub const DEFAULT_RESULTS_FILENAME: &str = "batch_evaluation_results.json";

const PROMPT_KEY: &str = "Custom Prompt";
const TOP_K_KEY: &str = "Top K Retrieved";
const AVERAGES_KEY: &str = "Average Metrics";

/// What [`ResultStore::append`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// A run with the same prompt was already stored; nothing was written.
    Duplicate,
}

/// Stored summary of one prompt's run.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSummary {
    pub top_k: Option<usize>,
    pub averages: Option<Averages>,
}

/// JSON file holding every saved evaluation run.
#[derive(Debug, Clone)]
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store a run unless one with the same prompt already exists.
    ///
    /// A missing log counts as empty. An existing log that cannot be read or
    /// parsed is an error and is left untouched.
    pub fn append(&mut self, run: &EvaluationRun) -> Result<AppendOutcome> {
        let mut entries = match self.read_entries() {
            Ok(entries) => entries,
            Err(ReadError::Missing) => Vec::new(),
            Err(ReadError::Failed(reason)) => {
                return Err(RagEvalError::ResultStore(format!(
                    "cannot update '{}': {}",
                    self.path.display(),
                    reason
                )));
            }
        };

        if entries
            .iter()
            .any(|entry| prompt_of(entry) == Some(run.custom_prompt.as_str()))
        {
            info!(path = %self.path.display(), "Prompt already saved; skipping");
            return Ok(AppendOutcome::Duplicate);
        }

        let value = serde_json::to_value(run)
            .map_err(|e| RagEvalError::Serialization(e.to_string()))?;
        entries.push(value);

        let bytes = to_pretty_json(&entries)?;
        write_atomic(&self.path, &bytes)
            .map_err(|e| RagEvalError::ResultStore(e.to_string()))?;

        info!(path = %self.path.display(), runs = entries.len(), "Saved evaluation run");
        Ok(AppendOutcome::Appended)
    }

    /// Every saved prompt with its retrieval depth and averages.
    ///
    /// Returns an empty map if the log is missing or unparseable.
    pub fn list_all(&self) -> BTreeMap<String, PromptSummary> {
        let mut summaries = BTreeMap::new();

        for entry in self.read_entries_soft() {
            let Some(prompt) = prompt_of(&entry) else {
                continue;
            };

            let top_k = entry
                .get(TOP_K_KEY)
                .and_then(Value::as_u64)
                .map(|k| k as usize);
            let averages = entry
                .get(AVERAGES_KEY)
                .and_then(|v| serde_json::from_value(v.clone()).ok());

            summaries
                .entry(prompt.to_string())
                .or_insert(PromptSummary { top_k, averages });
        }

        summaries
    }

    /// Saved prompts in the order they were first stored.
    pub fn saved_prompts(&self) -> Vec<String> {
        let mut prompts: Vec<String> = Vec::new();
        for entry in self.read_entries_soft() {
            if let Some(prompt) = prompt_of(&entry) {
                if !prompts.iter().any(|p| p == prompt) {
                    prompts.push(prompt.to_string());
                }
            }
        }
        prompts
    }

    fn read_entries_soft(&self) -> Vec<Value> {
        match self.read_entries() {
            Ok(entries) => entries,
            Err(ReadError::Missing) => Vec::new(),
            Err(ReadError::Failed(reason)) => {
                warn!(path = %self.path.display(), reason = %reason, "Ignoring unreadable result log");
                Vec::new()
            }
        }
    }

    fn read_entries(&self) -> std::result::Result<Vec<Value>, ReadError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(ReadError::Missing),
            Err(e) => return Err(ReadError::Failed(e.to_string())),
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Array(entries)) => Ok(entries),
            // A log holding a single run object.
            Ok(entry @ Value::Object(_)) => Ok(vec![entry]),
            Ok(other) => Err(ReadError::Failed(format!(
                "expected a JSON array, found {}",
                json_kind(&other)
            ))),
            Err(e) => Err(ReadError::Failed(e.to_string())),
        }
    }
}

enum ReadError {
    Missing,
    Failed(String),
}

fn prompt_of(entry: &Value) -> Option<&str> {
    entry.get(PROMPT_KEY).and_then(Value::as_str)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Four-space indented JSON, matching logs written by earlier tooling.
fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| RagEvalError::Serialization(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::evaluator::EvaluationRecord;
    use crate::eval::metrics::Scores;
    use tempfile::TempDir;

    fn run(prompt: &str, top_k: usize, bleu: f64) -> EvaluationRun {
        let records = vec![EvaluationRecord::scored(
            "How do I reset my password?",
            "Use the reset link.".to_string(),
            Scores {
                bleu,
                ..Scores::default()
            },
        )];
        let averages = Averages::from_records(&records).unwrap();
        EvaluationRun {
            custom_prompt: prompt.to_string(),
            top_k,
            records,
            averages,
        }
    }

    #[test]
    fn test_append_then_list() {
        let dir = TempDir::new().unwrap();
        let mut store = ResultStore::new(dir.path().join(DEFAULT_RESULTS_FILENAME));

        assert_eq!(store.append(&run("P1 <query>", 3, 0.25)).unwrap(), AppendOutcome::Appended);
        assert_eq!(store.append(&run("P2 <query>", 5, 0.75)).unwrap(), AppendOutcome::Appended);

        let all = store.list_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all["P1 <query>"].top_k, Some(3));
        assert_eq!(all["P2 <query>"].averages.unwrap().bleu, 0.75);
        assert_eq!(store.saved_prompts(), vec!["P1 <query>", "P2 <query>"]);
    }

    #[test]
    fn test_duplicate_prompt_keeps_first() {
        let dir = TempDir::new().unwrap();
        let mut store = ResultStore::new(dir.path().join("results.json"));

        assert_eq!(store.append(&run("same", 3, 0.1)).unwrap(), AppendOutcome::Appended);
        assert_eq!(store.append(&run("same", 7, 0.9)).unwrap(), AppendOutcome::Duplicate);

        let stored: Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        let entries = stored.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["Top K Retrieved"], 3);
        assert_eq!(entries[0]["Average Metrics"]["Average BLEU"], 0.1);
    }

    #[test]
    fn test_file_layout() {
        let dir = TempDir::new().unwrap();
        let mut store = ResultStore::new(dir.path().join("results.json"));
        store.append(&run("P", 2, 0.0)).unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.starts_with("[\n    {"));

        let stored: Value = serde_json::from_str(&text).unwrap();
        let entry = &stored[0];
        assert_eq!(entry["Custom Prompt"], "P");
        assert_eq!(entry["Metrics"][0]["Question"], "How do I reset my password?");
        assert!(entry["Average Metrics"].get("Average Exact Match").is_some());
    }

    #[test]
    fn test_single_object_log_is_wrapped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.json");
        fs::write(&path, r#"{"Custom Prompt": "old", "Top K Retrieved": 4}"#).unwrap();

        let mut store = ResultStore::new(&path);
        assert_eq!(store.append(&run("old", 1, 0.0)).unwrap(), AppendOutcome::Duplicate);
        assert_eq!(store.append(&run("new", 1, 0.0)).unwrap(), AppendOutcome::Appended);
        assert_eq!(store.saved_prompts(), vec!["old", "new"]);
        assert_eq!(store.list_all()["old"].averages, None);
    }

    #[test]
    fn test_missing_log_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let store = ResultStore::new(dir.path().join("absent.json"));
        assert!(store.list_all().is_empty());
        assert!(store.saved_prompts().is_empty());
    }

    #[test]
    fn test_corrupt_log_soft_fails_read_and_hard_fails_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.json");
        fs::write(&path, "[{\"Custom Prompt\": ").unwrap();

        let mut store = ResultStore::new(&path);
        assert!(store.list_all().is_empty());

        let err = store.append(&run("P", 1, 0.0)).unwrap_err();
        assert!(matches!(err, RagEvalError::ResultStore(_)));
        // The corrupt file is left as it was.
        assert_eq!(fs::read_to_string(&path).unwrap(), "[{\"Custom Prompt\": ");
    }

    #[test]
    fn test_unwritable_location_fails() {
        let dir = TempDir::new().unwrap();
        let mut store = ResultStore::new(dir.path().join("no-such-dir").join("results.json"));
        let err = store.append(&run("P", 1, 0.0)).unwrap_err();
        assert!(matches!(err, RagEvalError::ResultStore(_)));
    }
}
