//! FAQ corpus loading.
//!
//! The corpus file is a JSON array of `{"question": ..., "answer": ...}`
//! objects. Each entry becomes a searchable document `"Q: <question> A: <answer>"`
//! kept index-aligned with its question and reference answer.

use crate::error::{RagEvalError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A single question/answer pair from the corpus file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub question: String,
    pub answer: String,
}

impl CorpusEntry {
    /// Text that gets embedded and retrieved for this entry.
    pub fn document(&self) -> String {
        format!("Q: {} A: {}", self.question, self.answer)
    }
}

/// A loaded corpus: documents, questions and answers share one index space.
///
/// The three sequences are only ever built together, so `documents[i]`,
/// `questions[i]` and `answers[i]` always describe the same entry.
#[derive(Debug, Clone)]
pub struct Corpus {
    path: Option<PathBuf>,
    documents: Vec<String>,
    questions: Vec<String>,
    answers: Vec<String>,
}

impl Corpus {
    /// Build a corpus from entries, preserving their order.
    pub fn from_entries(entries: Vec<CorpusEntry>) -> Self {
        let mut documents = Vec::with_capacity(entries.len());
        let mut questions = Vec::with_capacity(entries.len());
        let mut answers = Vec::with_capacity(entries.len());

        for entry in entries {
            documents.push(entry.document());
            questions.push(entry.question);
            answers.push(entry.answer);
        }

        Self {
            path: None,
            documents,
            questions,
            answers,
        }
    }

    /// Load a corpus from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RagEvalError::io(path, e))?;
        let mut corpus = Self::from_json(&content)?;
        corpus.path = Some(path.to_path_buf());

        info!(path = %path.display(), entries = corpus.len(), "Loaded corpus");
        Ok(corpus)
    }

    /// Parse corpus JSON text.
    pub fn from_json(content: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| RagEvalError::CorpusFormat(format!("invalid JSON: {}", e)))?;

        let items = value.as_array().ok_or_else(|| {
            RagEvalError::CorpusFormat("expected a JSON array of question/answer objects".into())
        })?;

        let entries = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                CorpusEntry::deserialize(item).map_err(|e| {
                    RagEvalError::CorpusFormat(format!("entry {}: {}", i, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::from_entries(entries))
    }

    /// File the corpus was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn documents(&self) -> &[String] {
        &self.documents
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    pub fn answers(&self) -> &[String] {
        &self.answers
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Check if the corpus is empty.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Questions and reference answers at the given indices, in index order.
    ///
    /// Indices out of range are rejected rather than skipped so that the
    /// returned pairs stay aligned with the caller's sample.
    pub fn sample(&self, indices: &[usize]) -> Result<(Vec<String>, Vec<String>)> {
        let mut questions = Vec::with_capacity(indices.len());
        let mut answers = Vec::with_capacity(indices.len());

        for &i in indices {
            if i >= self.len() {
                return Err(RagEvalError::InvalidArgument(format!(
                    "sample index {} out of range for corpus of {}",
                    i,
                    self.len()
                )));
            }
            questions.push(self.questions[i].clone());
            answers.push(self.answers[i].clone());
        }

        Ok((questions, answers))
    }
}

/// Per-session cache of loaded corpora keyed by path.
///
/// Repeated loads of the same path return the cached corpus without touching
/// the file. Changes to the file after the first load are not picked up.
#[derive(Debug, Default)]
pub struct CorpusCache {
    entries: HashMap<PathBuf, Arc<Corpus>>,
}

impl CorpusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a corpus, reusing a previous load of the same path.
    pub fn load(&mut self, path: &Path) -> Result<Arc<Corpus>> {
        if let Some(corpus) = self.entries.get(path) {
            debug!(path = %path.display(), "Corpus cache hit");
            return Ok(Arc::clone(corpus));
        }

        let corpus = Arc::new(Corpus::load(path)?);
        self.entries.insert(path.to_path_buf(), Arc::clone(&corpus));
        Ok(corpus)
    }

    /// Number of cached corpora.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
