//! Batch evaluation of prompt templates.
//!
//! This module provides:
//! - Text-similarity metrics (BLEU, ROUGE-1/2/L, exact match)
//! - Random question sampling
//! - The batch evaluator with progress reporting
//! - The JSON result log

pub mod evaluator;
pub mod metrics;
pub mod results;
pub mod sampling;

pub use evaluator::{Averages, EvaluationRecord, EvaluationRun, Evaluator};
pub use metrics::{Scores, score};
pub use results::{AppendOutcome, PromptSummary, ResultStore};
pub use sampling::{make_rng, sample_indices};
