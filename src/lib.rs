//! FAQ RAG evaluation harness.
//!
//! Embeds a question/answer corpus into a flat L2 vector index, answers
//! questions with a local Ollama model using retrieved FAQ entries as
//! context, and scores prompt templates against the reference answers.
//!
//! # Quick Start
//!
//! ```no_run
//! use faq_rag_eval::{
//!     config::Config,
//!     embeddings::MiniLmEmbedder,
//!     eval::{AppendOutcome, ResultStore},
//!     llm::{DEFAULT_BATCH_TEMPLATE, PromptTemplate},
//!     session::Session,
//! };
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     config.validate()?;
//!
//!     // Loads the corpus and reuses or rebuilds the persisted index
//!     let embedder = MiniLmEmbedder::load(&config.embedding.model_id)?;
//!     let session = Session::open(&config, Path::new("faq_data.json"), Box::new(embedder))?;
//!
//!     // Evaluate a template on five random questions
//!     let template = PromptTemplate::new(DEFAULT_BATCH_TEMPLATE);
//!     let run = session
//!         .evaluate(&template, 3, 5, None, 1, &mut |done, total| {
//!             println!("{}/{}", done, total);
//!         })
//!         .await?;
//!
//!     println!("Average BLEU: {:.4}", run.averages.bleu);
//!
//!     let mut store = ResultStore::new(&config.results.path);
//!     if store.append(&run)? == AppendOutcome::Duplicate {
//!         println!("Prompt was already saved");
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Corpus**: FAQ entries as aligned documents, questions and answers
//! - **VectorIndex**: exact nearest-neighbour search, persisted as two files
//! - **OllamaClient**: streaming chat completions
//! - **Evaluator**: retrieve, prompt, complete and score a batch of questions
//! - **ResultStore**: JSON log of evaluation runs, one per prompt
//! - **Session**: ties the above together for one corpus

pub mod config;
pub mod corpus;
pub mod embeddings;
pub mod error;
pub mod eval;
pub mod index;
pub mod llm;
pub mod persistence;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::Config;
pub use corpus::{Corpus, CorpusCache, CorpusEntry};
pub use embeddings::Embedder;
pub use error::{RagEvalError, Result};
pub use eval::{EvaluationRun, Evaluator, ResultStore, Scores};
pub use index::{FlatIndex, VectorIndex};
pub use llm::{Completer, OllamaClient, PromptTemplate};
pub use persistence::IndexStore;
pub use session::{Session, SingleQueryAnswer};
