//! Deterministic stand-ins for the embedding model and the completion server.

use crate::embeddings::Embedder;
use crate::error::Result;
use crate::llm::Completer;
use async_trait::async_trait;
use std::time::Duration;

/// Embeds text as keyword occurrence counts, one dimension per keyword.
pub struct KeywordEmbedder {
    model_id: String,
    keywords: Vec<String>,
}

impl KeywordEmbedder {
    pub fn new(keywords: &[&str]) -> Self {
        Self {
            model_id: "keyword-test".to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    pub fn with_model_id(mut self, model_id: &str) -> Self {
        self.model_id = model_id.to_string();
        self
    }
}

impl Embedder for KeywordEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.keywords.len()
    }

    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let text = text.to_lowercase();
                self.keywords
                    .iter()
                    .map(|kw| text.matches(kw.as_str()).count() as f32)
                    .collect()
            })
            .collect())
    }
}

fn no_delay(_: &str) -> Duration {
    Duration::ZERO
}

/// Completer backed by a closure, with an optional per-prompt delay.
pub struct FnCompleter<F, D = fn(&str) -> Duration> {
    answer: F,
    delay: D,
}

impl<F> FnCompleter<F>
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    pub fn new(answer: F) -> Self {
        Self {
            answer,
            delay: no_delay,
        }
    }
}

impl<F, D> FnCompleter<F, D>
where
    F: Fn(&str) -> Result<String> + Send + Sync,
    D: Fn(&str) -> Duration + Send + Sync,
{
    pub fn with_delay(answer: F, delay: D) -> Self {
        Self { answer, delay }
    }
}

#[async_trait]
impl<F, D> Completer for FnCompleter<F, D>
where
    F: Fn(&str) -> Result<String> + Send + Sync,
    D: Fn(&str) -> Duration + Send + Sync,
{
    async fn complete(&self, prompt: &str) -> Result<String> {
        let delay = (self.delay)(prompt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.answer)(prompt)
    }
}
