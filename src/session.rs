//! A working session over one corpus: its index, the embedding model and the
//! completion backend.
//!
//! Opening a session loads the corpus and reuses the persisted index when it
//! still matches; otherwise the index is rebuilt and saved.

use crate::config::{Config, MAX_TOP_K};
use crate::corpus::{Corpus, CorpusCache};
use crate::embeddings::Embedder;
use crate::error::{RagEvalError, Result};
use crate::eval::{EvaluationRun, Evaluator, make_rng, sample_indices};
use crate::index::{ScoredDocument, VectorIndex, corpus_digest};
use crate::llm::{Completer, OllamaClient, PromptTemplate};
use crate::persistence::IndexStore;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything produced by a single retrieval-augmented query.
#[derive(Debug, Clone)]
pub struct SingleQueryAnswer {
    pub documents: Vec<ScoredDocument>,
    pub prompt: String,
    pub answer: String,
}

pub struct Session<C = OllamaClient> {
    corpora: CorpusCache,
    corpus: Arc<Corpus>,
    store: IndexStore,
    index: VectorIndex,
    embedder: Box<dyn Embedder>,
    completer: C,
}

impl Session<OllamaClient> {
    /// Open a session that completes through the configured Ollama server.
    pub fn open(config: &Config, corpus_path: &Path, embedder: Box<dyn Embedder>) -> Result<Self> {
        let client = OllamaClient::new(config.llm.clone())?;
        Self::open_with(config, corpus_path, embedder, client)
    }
}

impl<C: Completer> Session<C> {
    /// Open a session with an explicit completion backend.
    pub fn open_with(
        config: &Config,
        corpus_path: &Path,
        embedder: Box<dyn Embedder>,
        completer: C,
    ) -> Result<Self> {
        let mut corpora = CorpusCache::new();
        let corpus = corpora.load(corpus_path)?;
        let store = IndexStore::new(&config.index.dir);

        let index = match store.load() {
            Some(index) if index_matches(&index, &corpus, embedder.as_ref()) => index,
            Some(index) => {
                info!(
                    stored_rows = index.len(),
                    corpus_rows = corpus.len(),
                    stored_model = index.model_id(),
                    model = embedder.model_id(),
                    "Persisted index does not match corpus contents or model; rebuilding"
                );
                VectorIndex::build(corpus.documents(), embedder.as_ref(), &store)?
            }
            None => VectorIndex::build(corpus.documents(), embedder.as_ref(), &store)?,
        };

        Ok(Self {
            corpora,
            corpus,
            store,
            index,
            embedder,
            completer,
        })
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn index_store(&self) -> &IndexStore {
        &self.store
    }

    pub fn completer(&self) -> &C {
        &self.completer
    }

    /// Rebuild the index from scratch and overwrite the persisted copy.
    ///
    /// The corpus comes from the session cache, so edits to the corpus file
    /// made after the session was opened are not picked up.
    pub fn rebuild_index(&mut self) -> Result<()> {
        if let Some(path) = self.corpus.path().map(Path::to_path_buf) {
            self.corpus = self.corpora.load(&path)?;
        }
        self.index = VectorIndex::build(self.corpus.documents(), self.embedder.as_ref(), &self.store)?;
        Ok(())
    }

    /// The `k` corpus documents closest to `query`, closest first.
    pub fn retrieve(&self, query: &str, k: usize) -> Result<Vec<String>> {
        Ok(self
            .retrieve_scored(query, k)?
            .into_iter()
            .map(|hit| hit.document)
            .collect())
    }

    /// Like [`Session::retrieve`], keeping row ids and distances.
    pub fn retrieve_scored(&self, query: &str, k: usize) -> Result<Vec<ScoredDocument>> {
        check_top_k(k)?;
        self.index
            .search_scored(query, self.embedder.as_ref(), self.corpus.documents(), k)
    }

    /// Retrieve, render the template and generate one answer.
    pub async fn answer(
        &self,
        query: &str,
        template: &PromptTemplate,
        k: usize,
    ) -> Result<SingleQueryAnswer> {
        let documents = self.retrieve_scored(query, k)?;
        let texts: Vec<&str> = documents.iter().map(|d| d.document.as_str()).collect();
        let prompt = template.render(&texts, query);

        debug!(retrieved = documents.len(), "Generating answer");
        let answer = self.completer.complete(&prompt).await?;

        Ok(SingleQueryAnswer {
            documents,
            prompt,
            answer,
        })
    }

    /// Evaluate `template` on `sample_size` randomly chosen corpus questions.
    pub async fn evaluate(
        &self,
        template: &PromptTemplate,
        k: usize,
        sample_size: usize,
        seed: Option<u64>,
        concurrency: usize,
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Result<EvaluationRun> {
        check_top_k(k)?;
        if self.corpus.is_empty() {
            return Err(RagEvalError::EmptyBatch);
        }

        let mut rng = make_rng(seed);
        let indices = sample_indices(self.corpus.len(), sample_size, &mut rng)?;
        let (questions, answers) = self.corpus.sample(&indices)?;

        Evaluator::new(
            &self.index,
            self.corpus.documents(),
            self.embedder.as_ref(),
            &self.completer,
            k,
        )
        .with_concurrency(concurrency)
        .run(template, &questions, &answers, on_progress)
        .await
    }
}

fn index_matches(index: &VectorIndex, corpus: &Corpus, embedder: &dyn Embedder) -> bool {
    index.len() == corpus.len()
        && index.model_id() == embedder.model_id()
        && index.dimension() == embedder.dimension()
        && index.corpus_digest() == corpus_digest(corpus.documents())
}

fn check_top_k(k: usize) -> Result<()> {
    if !(1..=MAX_TOP_K).contains(&k) {
        return Err(RagEvalError::InvalidArgument(format!(
            "top_k must be between 1 and {}, got {}",
            MAX_TOP_K, k
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FnCompleter, KeywordEmbedder};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const KEYWORDS: &[&str] = &["password", "invoice", "billing", "delete", "account"];

    const FAQ: &str = r#"[
        {"question": "How do I reset my password?", "answer": "Use the password reset link."},
        {"question": "Where do I find invoices?", "answer": "Invoices are under billing."},
        {"question": "How do I delete my account?", "answer": "Contact support to delete the account."}
    ]"#;

    struct Env {
        _dir: TempDir,
        corpus_path: PathBuf,
        config: Config,
    }

    fn env() -> Env {
        let dir = TempDir::new().unwrap();
        let corpus_path = dir.path().join("faq_data.json");
        fs::write(&corpus_path, FAQ).unwrap();

        let mut config = Config::default();
        config.index.dir = dir.path().join("index");
        fs::create_dir_all(&config.index.dir).unwrap();

        Env {
            _dir: dir,
            corpus_path,
            config,
        }
    }

    fn echo() -> impl Completer {
        FnCompleter::new(|prompt: &str| Ok(prompt.to_string()))
    }

    fn open(env: &Env, embedder: KeywordEmbedder) -> Session<impl Completer> {
        Session::open_with(&env.config, &env.corpus_path, Box::new(embedder), echo()).unwrap()
    }

    #[test]
    fn test_open_builds_and_persists_index() {
        let env = env();
        let session = open(&env, KeywordEmbedder::new(KEYWORDS));

        assert_eq!(session.index().len(), 3);
        assert_eq!(session.corpus().len(), 3);
        assert!(session.index_store().exists());
    }

    #[test]
    fn test_reopen_reuses_persisted_index() {
        let env = env();
        let first = open(&env, KeywordEmbedder::new(KEYWORDS));
        let second = open(&env, KeywordEmbedder::new(KEYWORDS));

        assert_eq!(first.index(), second.index());
        assert_eq!(
            first.retrieve("reset password", 3).unwrap(),
            second.retrieve("reset password", 3).unwrap()
        );
    }

    #[test]
    fn test_corpus_size_change_triggers_rebuild() {
        let env = env();
        open(&env, KeywordEmbedder::new(KEYWORDS));

        fs::write(
            &env.corpus_path,
            r#"[{"question": "Where do I find invoices?", "answer": "Under billing."}]"#,
        )
        .unwrap();
        let session = open(&env, KeywordEmbedder::new(KEYWORDS));
        assert_eq!(session.index().len(), 1);
        assert_eq!(session.index_store().load().unwrap().len(), 1);
    }

    #[test]
    fn test_same_size_corpus_edit_triggers_rebuild() {
        let env = env();
        let before = open(&env, KeywordEmbedder::new(KEYWORDS));
        let old_digest = before.index().corpus_digest().to_string();
        drop(before);

        fs::write(
            &env.corpus_path,
            r#"[
                {"question": "How do I delete my account?", "answer": "Contact support to delete the account."},
                {"question": "Where do I find invoices?", "answer": "Invoices are under billing."},
                {"question": "How do I reset my password?", "answer": "Use the password reset link."}
            ]"#,
        )
        .unwrap();

        let session = open(&env, KeywordEmbedder::new(KEYWORDS));
        assert_eq!(session.index().len(), 3);
        assert_ne!(session.index().corpus_digest(), old_digest);
        assert_eq!(
            session.index_store().load().unwrap().corpus_digest(),
            session.index().corpus_digest()
        );

        let hits = session.retrieve_scored("delete account", 1).unwrap();
        assert_eq!(hits[0].row, 0);
        assert_eq!(hits[0].document, session.corpus().documents()[0]);
    }

    #[test]
    fn test_model_change_triggers_rebuild() {
        let env = env();
        open(&env, KeywordEmbedder::new(KEYWORDS));

        let session = open(&env, KeywordEmbedder::new(KEYWORDS).with_model_id("other-model"));
        assert_eq!(session.index().model_id(), "other-model");
        assert_eq!(session.index_store().load().unwrap().model_id(), "other-model");
    }

    #[test]
    fn test_empty_corpus_cannot_be_opened() {
        let env = env();
        fs::write(&env.corpus_path, "[]").unwrap();

        let result = Session::open_with(
            &env.config,
            &env.corpus_path,
            Box::new(KeywordEmbedder::new(KEYWORDS)),
            echo(),
        );
        assert!(matches!(result, Err(RagEvalError::EmptyCorpus(_))));
    }

    #[test]
    fn test_retrieve_ranks_and_bounds() {
        let env = env();
        let session = open(&env, KeywordEmbedder::new(KEYWORDS));

        let docs = session.retrieve("delete account", 1).unwrap();
        assert_eq!(docs, vec![session.corpus().documents()[2].clone()]);

        assert_eq!(session.retrieve("anything", 10).unwrap().len(), 3);
        assert!(matches!(
            session.retrieve("anything", 0),
            Err(RagEvalError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.retrieve("anything", 11),
            Err(RagEvalError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_answer_renders_prompt() {
        let env = env();
        let session = open(&env, KeywordEmbedder::new(KEYWORDS));
        let template = PromptTemplate::new("Context:\n<retrieved_docs>\nQ: <query>");

        let result = session
            .answer("Where do I find invoices?", &template, 1)
            .await
            .unwrap();

        assert_eq!(result.documents.len(), 1);
        assert_eq!(result.documents[0].row, 1);
        assert_eq!(
            result.prompt,
            format!(
                "Context:\n{}\nQ: Where do I find invoices?",
                session.corpus().documents()[1]
            )
        );
        assert_eq!(result.answer, result.prompt);
    }

    #[tokio::test]
    async fn test_evaluate_samples_questions() {
        let env = env();
        let session = open(&env, KeywordEmbedder::new(KEYWORDS));

        let mut done = Vec::new();
        let run = session
            .evaluate(
                &PromptTemplate::new("<query>"),
                2,
                3,
                Some(11),
                1,
                &mut |n, total| done.push((n, total)),
            )
            .await
            .unwrap();

        assert_eq!(run.records.len(), 3);
        assert_eq!(run.top_k, 2);
        assert_eq!(run.custom_prompt, "<query>");
        assert_eq!(done, vec![(1, 3), (2, 3), (3, 3)]);

        let mut questions: Vec<&str> = run.records.iter().map(|r| r.question.as_str()).collect();
        questions.sort_unstable();
        let mut expected: Vec<&str> = session.corpus().questions().iter().map(String::as_str).collect();
        expected.sort_unstable();
        assert_eq!(questions, expected);
    }

    #[tokio::test]
    async fn test_evaluate_rejects_oversized_sample() {
        let env = env();
        let session = open(&env, KeywordEmbedder::new(KEYWORDS));

        let err = session
            .evaluate(&PromptTemplate::default(), 1, 4, None, 1, &mut |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, RagEvalError::InvalidArgument(_)));
    }

    #[test]
    fn test_rebuild_index_is_reproducible() {
        let env = env();
        let mut session = open(&env, KeywordEmbedder::new(KEYWORDS));
        let before = session.index().clone();

        session.rebuild_index().unwrap();
        assert_eq!(session.index(), &before);
        assert!(session.index_store().exists());
    }
}
