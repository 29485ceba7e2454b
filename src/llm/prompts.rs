//! Prompt templates with `<retrieved_docs>` and `<query>` placeholders.

use std::fmt;

/// Placeholder replaced by the newline-joined retrieved documents.
pub const RETRIEVED_DOCS_TOKEN: &str = "<retrieved_docs>";

/// Placeholder replaced by the user question.
pub const QUERY_TOKEN: &str = "<query>";

/// Default template for answering a single question.
pub const DEFAULT_QUERY_TEMPLATE: &str = "Answer the following question using the provided context:\nContext:\n<retrieved_docs>\nQuestion: <query>\nAnswer:";

/// Default template for batch evaluation.
pub const DEFAULT_BATCH_TEMPLATE: &str = "Answer the following question using the provided context:\nContext:\n<retrieved_docs>\nQuestion:\n<query>\nAnswer:";

/// A user-supplied prompt with literal placeholder tokens.
///
/// Rendering is plain string replacement of every occurrence, documents
/// first and then the query. Both tokens are optional.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// The template text as written by the user. This is the identity key of
    /// an evaluation run.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn has_docs_placeholder(&self) -> bool {
        self.text.contains(RETRIEVED_DOCS_TOKEN)
    }

    pub fn has_query_placeholder(&self) -> bool {
        self.text.contains(QUERY_TOKEN)
    }

    /// Substitute retrieved documents and the query.
    pub fn render<S: AsRef<str>>(&self, documents: &[S], query: &str) -> String {
        let context = documents
            .iter()
            .map(|d| d.as_ref())
            .collect::<Vec<&str>>()
            .join("\n");
        self.render_context(&context, query)
    }

    /// Substitute an already joined context block and the query.
    pub fn render_context(&self, context: &str, query: &str) -> String {
        self.text
            .replace(RETRIEVED_DOCS_TOKEN, context)
            .replace(QUERY_TOKEN, query)
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_TEMPLATE)
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for PromptTemplate {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for PromptTemplate {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_joins_documents_with_newline() {
        let template = PromptTemplate::new("Context:\n<retrieved_docs>\nQ: <query>");
        assert_eq!(template.render(&["A", "B"], "X?"), "Context:\nA\nB\nQ: X?");
    }

    #[test]
    fn test_render_replaces_every_occurrence() {
        let template = PromptTemplate::new("<query> | <retrieved_docs> | <query>");
        assert_eq!(template.render(&["doc"], "why"), "why | doc | why");
    }

    #[test]
    fn test_placeholders_are_optional() {
        let template = PromptTemplate::new("Just answer.");
        assert!(!template.has_docs_placeholder());
        assert!(!template.has_query_placeholder());
        assert_eq!(template.render(&["ignored"], "ignored"), "Just answer.");
    }

    #[test]
    fn test_documents_substituted_before_query() {
        // A document that happens to contain the query token is expanded too.
        let template = PromptTemplate::new("<retrieved_docs>");
        assert_eq!(template.render(&["see <query>"], "Q"), "see Q");
    }

    #[test]
    fn test_default_templates_have_both_placeholders() {
        for text in [DEFAULT_QUERY_TEMPLATE, DEFAULT_BATCH_TEMPLATE] {
            let template = PromptTemplate::new(text);
            assert!(template.has_docs_placeholder());
            assert!(template.has_query_placeholder());
        }
    }
}
