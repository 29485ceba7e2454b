//! Configuration for the evaluation harness.
//!
//! Supports both environment variables and YAML config file.
//! Environment variables take precedence over config file values.

use crate::error::{RagEvalError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Largest retrieval depth the harness accepts.
pub const MAX_TOP_K: usize = 10;

/// Completion server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the Ollama server (e.g., "http://localhost:11434")
    pub base_url: String,

    /// Model name (e.g., "llama3.2")
    pub model: String,

    /// Upper bound on a whole completion request, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra attempts after a failed completion. Zero disables retries.
    #[serde(default)]
    pub max_retries: u32,
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            timeout_secs: default_timeout_secs(),
            max_retries: 0,
        }
    }
}

/// Embedding model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Hugging Face model id of the sentence-transformers model.
    pub model_id: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
        }
    }
}

/// Where the persisted index artifacts live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory holding `vector_index.bin` and `embeddings.f32`.
    pub dir: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
        }
    }
}

/// Result log location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsConfig {
    pub path: PathBuf,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("batch_evaluation_results.json"),
        }
    }
}

/// Defaults for batch evaluation runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    pub top_k: usize,
    pub sample_size: usize,
    /// Questions processed concurrently. Output order never changes.
    pub concurrency: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            sample_size: 5,
            concurrency: 1,
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub results: ResultsConfig,
    pub eval: EvalConfig,
}

/// Configuration file structure (YAML format).
#[derive(Debug, Deserialize)]
struct ConfigFile {
    llm: Option<LlmFileSection>,
    embedding: Option<EmbeddingFileSection>,
    index: Option<IndexFileSection>,
    results: Option<ResultsFileSection>,
    eval: Option<EvalFileSection>,
}

#[derive(Debug, Deserialize)]
struct LlmFileSection {
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingFileSection {
    model_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndexFileSection {
    dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ResultsFileSection {
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct EvalFileSection {
    top_k: Option<usize>,
    sample_size: Option<usize>,
    concurrency: Option<usize>,
}

impl Config {
    /// Load configuration from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (LLM_API_BASE, LLM_MODEL, EMBEDDING_MODEL, ...)
    /// 2. Config file (~/.config/faq-rag-eval/config.yaml)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                config = Self::load_from_file(&config_path)?;
            }
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(base_url) = env::var("LLM_API_BASE") {
            self.llm.base_url = base_url;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            self.llm.model = model;
        }

        if let Ok(timeout) = env::var("LLM_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse() {
                self.llm.timeout_secs = secs;
            }
        }

        if let Ok(retries) = env::var("LLM_MAX_RETRIES") {
            if let Ok(n) = retries.parse() {
                self.llm.max_retries = n;
            }
        }

        if let Ok(model_id) = env::var("EMBEDDING_MODEL") {
            self.embedding.model_id = model_id;
        }

        if let Ok(dir) = env::var("INDEX_DIR") {
            self.index.dir = PathBuf::from(dir);
        }

        if let Ok(path) = env::var("RESULTS_PATH") {
            self.results.path = PathBuf::from(path);
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RagEvalError::io(path, e))?;
        Self::from_yaml(&content)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        let file_config: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| RagEvalError::Config(format!("Failed to parse config file: {}", e)))?;

        let mut config = Config::default();

        if let Some(llm) = file_config.llm {
            if let Some(base_url) = llm.base_url {
                config.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                config.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                config.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                config.llm.max_retries = max_retries;
            }
        }

        if let Some(model_id) = file_config.embedding.and_then(|e| e.model_id) {
            config.embedding.model_id = model_id;
        }

        if let Some(dir) = file_config.index.and_then(|i| i.dir) {
            config.index.dir = dir;
        }

        if let Some(path) = file_config.results.and_then(|r| r.path) {
            config.results.path = path;
        }

        if let Some(eval) = file_config.eval {
            if let Some(top_k) = eval.top_k {
                config.eval.top_k = top_k;
            }
            if let Some(sample_size) = eval.sample_size {
                config.eval.sample_size = sample_size;
            }
            if let Some(concurrency) = eval.concurrency {
                config.eval.concurrency = concurrency;
            }
        }

        Ok(config)
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "faq-rag-eval")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Validate that required configuration is present and in range.
    pub fn validate(&self) -> Result<()> {
        if self.llm.base_url.is_empty() {
            return Err(RagEvalError::Config(
                "Completion server URL is required. Set LLM_API_BASE environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.model.is_empty() {
            return Err(RagEvalError::Config(
                "LLM model is required. Set LLM_MODEL environment variable or add to config file."
                    .to_string(),
            ));
        }

        if self.llm.timeout_secs == 0 {
            return Err(RagEvalError::Config(
                "llm.timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.embedding.model_id.is_empty() {
            return Err(RagEvalError::Config(
                "Embedding model id is required. Set EMBEDDING_MODEL or add to config file."
                    .to_string(),
            ));
        }

        if !(1..=MAX_TOP_K).contains(&self.eval.top_k) {
            return Err(RagEvalError::Config(format!(
                "eval.top_k must be between 1 and {}, got {}",
                MAX_TOP_K, self.eval.top_k
            )));
        }

        if self.eval.concurrency == 0 {
            return Err(RagEvalError::Config(
                "eval.concurrency must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a config from explicit values (useful for testing).
    pub fn with_llm(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            llm: LlmConfig {
                base_url: base_url.into(),
                model: model.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
