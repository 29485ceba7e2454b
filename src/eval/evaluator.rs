//! Batch evaluation of a prompt template over a set of questions.

use super::metrics::{Scores, score};
use crate::embeddings::Embedder;
use crate::error::{RagEvalError, Result};
use crate::index::VectorIndex;
use crate::llm::{Completer, PromptTemplate};
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::pin::pin;
use tracing::{debug, info, warn};

/// Metrics for one evaluated question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    #[serde(rename = "Question")]
    pub question: String,
    #[serde(rename = "Generated Answer")]
    pub generated_answer: String,
    #[serde(rename = "BLEU")]
    pub bleu: f64,
    #[serde(rename = "ROUGE-1")]
    pub rouge1: f64,
    #[serde(rename = "ROUGE-2")]
    pub rouge2: f64,
    #[serde(rename = "ROUGE-L")]
    pub rouge_l: f64,
    #[serde(rename = "Exact Match")]
    pub exact_match: u8,
    /// Set when the completion for this question failed.
    #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvaluationRecord {
    pub fn scored(question: impl Into<String>, generated_answer: String, scores: Scores) -> Self {
        Self {
            question: question.into(),
            generated_answer,
            bleu: scores.bleu,
            rouge1: scores.rouge1,
            rouge2: scores.rouge2,
            rouge_l: scores.rouge_l,
            exact_match: scores.exact_match,
            error: None,
        }
    }

    /// Record for a question whose answer could not be generated. All
    /// scores are zero.
    pub fn failed(question: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::scored(question, String::new(), Scores::default())
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Arithmetic means over a batch of records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Averages {
    #[serde(rename = "Average BLEU")]
    pub bleu: f64,
    #[serde(rename = "Average ROUGE-1")]
    pub rouge1: f64,
    #[serde(rename = "Average ROUGE-2")]
    pub rouge2: f64,
    #[serde(rename = "Average ROUGE-L")]
    pub rouge_l: f64,
    #[serde(rename = "Average Exact Match")]
    pub exact_match: f64,
}

impl Averages {
    /// Mean of each metric. Fails on an empty batch instead of yielding NaN.
    pub fn from_records(records: &[EvaluationRecord]) -> Result<Self> {
        if records.is_empty() {
            return Err(RagEvalError::EmptyBatch);
        }

        let n = records.len() as f64;
        let mean = |f: fn(&EvaluationRecord) -> f64| records.iter().map(f).sum::<f64>() / n;

        Ok(Self {
            bleu: mean(|r| r.bleu),
            rouge1: mean(|r| r.rouge1),
            rouge2: mean(|r| r.rouge2),
            rouge_l: mean(|r| r.rouge_l),
            exact_match: mean(|r| f64::from(r.exact_match)),
        })
    }
}

/// One evaluation of a prompt template; the unit of persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRun {
    #[serde(rename = "Custom Prompt")]
    pub custom_prompt: String,
    #[serde(rename = "Top K Retrieved")]
    pub top_k: usize,
    #[serde(rename = "Metrics")]
    pub records: Vec<EvaluationRecord>,
    #[serde(rename = "Average Metrics")]
    pub averages: Averages,
}

impl EvaluationRun {
    /// Number of questions whose completion failed.
    pub fn failures(&self) -> usize {
        self.records.iter().filter(|r| r.is_failed()).count()
    }
}

/// Runs retrieve → template → complete → score for each question.
pub struct Evaluator<'a, C: Completer + ?Sized> {
    index: &'a VectorIndex,
    documents: &'a [String],
    embedder: &'a dyn Embedder,
    completer: &'a C,
    top_k: usize,
    concurrency: usize,
}

impl<'a, C: Completer + ?Sized> Evaluator<'a, C> {
    pub fn new(
        index: &'a VectorIndex,
        documents: &'a [String],
        embedder: &'a dyn Embedder,
        completer: &'a C,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            documents,
            embedder,
            completer,
            top_k,
            concurrency: 1,
        }
    }

    /// Process up to `n` questions at once. Records still come back in
    /// input order and progress still counts up by one.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Evaluate every `(question, reference)` pair in order.
    ///
    /// `on_progress(done, total)` is called once per question, after its
    /// record is final.
    pub async fn run(
        &self,
        template: &PromptTemplate,
        questions: &[String],
        answers: &[String],
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Result<EvaluationRun> {
        if questions.len() != answers.len() {
            return Err(RagEvalError::InvalidArgument(format!(
                "{} questions but {} reference answers",
                questions.len(),
                answers.len()
            )));
        }
        if questions.is_empty() {
            return Err(RagEvalError::EmptyBatch);
        }

        let total = questions.len();
        info!(
            questions = total,
            top_k = self.top_k,
            concurrency = self.concurrency,
            "Starting batch evaluation"
        );

        let mut records = Vec::with_capacity(total);
        let mut pending = pin!(
            stream::iter(questions.iter().zip(answers))
                .map(|(question, reference)| self.evaluate_one(template, question, reference))
                .buffered(self.concurrency)
        );

        while let Some(record) = pending.next().await {
            records.push(record?);
            on_progress(records.len(), total);
        }

        let averages = Averages::from_records(&records)?;
        let run = EvaluationRun {
            custom_prompt: template.as_str().to_string(),
            top_k: self.top_k,
            records,
            averages,
        };

        info!(
            avg_bleu = run.averages.bleu,
            avg_rouge_l = run.averages.rouge_l,
            failures = run.failures(),
            "Batch evaluation finished"
        );
        Ok(run)
    }

    async fn evaluate_one(
        &self,
        template: &PromptTemplate,
        question: &str,
        reference: &str,
    ) -> Result<EvaluationRecord> {
        let retrieved = self
            .index
            .search(question, self.embedder, self.documents, self.top_k)?;
        let prompt = template.render(&retrieved, question);

        debug!(question, retrieved = retrieved.len(), "Generating answer");

        match self.completer.complete(&prompt).await {
            Ok(generated) => {
                let scores = score(&generated, reference);
                Ok(EvaluationRecord::scored(question, generated, scores))
            }
            Err(e) => {
                warn!(question, error = %e, "Completion failed; recording as failed answer");
                Ok(EvaluationRecord::failed(question, e.to_string()))
            }
        }
    }
}
