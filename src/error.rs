//! Error types for the evaluation harness.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, RagEvalError>;

/// Errors that can occur while indexing, retrieving, generating or scoring.
#[derive(Error, Debug)]
pub enum RagEvalError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The corpus file is not a JSON array of `{question, answer}` objects.
    #[error("Malformed corpus: {0}")]
    CorpusFormat(String),

    /// The corpus has no entries, so there is nothing to index.
    #[error("No entries found in corpus at '{0}'")]
    EmptyCorpus(PathBuf),

    /// Persisted index artifacts are missing or unusable.
    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// A vector does not have the dimension the index was built with.
    #[error("Embedding dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The embedding model failed to load or encode.
    #[error("Embedding model error: {0}")]
    Embedding(String),

    /// The completion server returned an error, timed out or dropped the stream.
    #[error("Completion service error: {0}")]
    CompletionService(String),

    /// An evaluation was requested over zero questions.
    #[error("Cannot evaluate an empty batch")]
    EmptyBatch,

    /// A caller-supplied argument is out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The result log could not be read for update or written.
    #[error("Result store error: {0}")]
    ResultStore(String),

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RagEvalError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<reqwest::Error> for RagEvalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RagEvalError::CompletionService(format!("request timed out: {}", err))
        } else {
            RagEvalError::CompletionService(err.to_string())
        }
    }
}
