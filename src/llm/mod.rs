//! Language-model integration.
//!
//! Provides the streaming Ollama client, the [`Completer`] seam used by the
//! batch evaluator, and prompt templating.

mod client;
mod prompts;
pub mod stream;

pub use client::{Completer, Message, OllamaClient, Role};
pub use prompts::{
    DEFAULT_BATCH_TEMPLATE, DEFAULT_QUERY_TEMPLATE, PromptTemplate, QUERY_TOKEN,
    RETRIEVED_DOCS_TOKEN,
};
pub use stream::{ChunkStream, NdjsonDecoder};
