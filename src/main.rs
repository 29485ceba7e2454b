//! FAQ RAG evaluation CLI
//!
//! Build the vector index, ask single questions and score prompt templates
//! against an FAQ corpus.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faq_rag_eval::{
    config::{Config, MAX_TOP_K},
    embeddings::MiniLmEmbedder,
    eval::{AppendOutcome, EvaluationRun, ResultStore},
    llm::{DEFAULT_BATCH_TEMPLATE, DEFAULT_QUERY_TEMPLATE, OllamaClient, PromptTemplate},
    session::Session,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Retrieval-augmented QA over an FAQ corpus, with prompt evaluation
#[derive(Parser)]
#[command(name = "rag-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the FAQ corpus (JSON array of question/answer objects)
    #[arg(long, global = true, default_value = "faq_data.json")]
    corpus: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or load the vector index and show its statistics
    Index {
        /// Rebuild even if a matching index exists
        #[arg(long)]
        rebuild: bool,
    },

    /// Answer a single question using retrieved FAQ entries as context
    Query {
        /// The question to answer
        question: String,

        /// Number of documents to retrieve
        #[arg(short = 'k', long, value_parser = clap::value_parser!(u64).range(1..=MAX_TOP_K as u64))]
        top_k: Option<u64>,

        /// Prompt template text
        #[arg(long, conflicts_with_all = ["prompt_file", "saved"])]
        prompt: Option<String>,

        /// Read the prompt template from a file
        #[arg(long, conflicts_with = "saved")]
        prompt_file: Option<PathBuf>,

        /// Use the n-th saved prompt (see `prompts`)
        #[arg(long)]
        saved: Option<usize>,

        /// Show the L2 distance of each retrieved document
        #[arg(long)]
        show_distances: bool,
    },

    /// Score a prompt template on randomly sampled corpus questions
    Eval {
        /// Prompt template text
        #[arg(long, conflicts_with = "prompt_file")]
        prompt: Option<String>,

        /// Read the prompt template from a file
        #[arg(long)]
        prompt_file: Option<PathBuf>,

        /// Number of documents to retrieve per question
        #[arg(short = 'k', long, value_parser = clap::value_parser!(u64).range(1..=MAX_TOP_K as u64))]
        top_k: Option<u64>,

        /// Number of questions to sample
        #[arg(short = 'n', long)]
        sample_size: Option<usize>,

        /// Seed for reproducible sampling
        #[arg(long)]
        seed: Option<u64>,

        /// Questions evaluated at once
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Append the run to the result log
        #[arg(long)]
        save: bool,

        /// Also write the run as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List saved prompts with their average metrics
    Prompts,

    /// Test the completion server connection
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "faq_rag_eval=debug"
    } else {
        "faq_rag_eval=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Index { rebuild } => cmd_index(&cli.corpus, rebuild),
        Commands::Query {
            question,
            top_k,
            prompt,
            prompt_file,
            saved,
            show_distances,
        } => {
            cmd_query(
                &cli.corpus,
                &question,
                top_k,
                TemplateSource::new(prompt, prompt_file, saved),
                show_distances,
            )
            .await
        }
        Commands::Eval {
            prompt,
            prompt_file,
            top_k,
            sample_size,
            seed,
            concurrency,
            save,
            output,
        } => {
            let options = EvalOptions {
                top_k,
                sample_size,
                seed,
                concurrency,
                save,
                output,
            };
            cmd_eval(
                &cli.corpus,
                TemplateSource::new(prompt, prompt_file, None),
                options,
            )
            .await
        }
        Commands::Prompts => cmd_prompts(),
        Commands::Check => cmd_check().await,
    }
}

enum TemplateSource {
    Default,
    Text(String),
    File(PathBuf),
    Saved(usize),
}

impl TemplateSource {
    fn new(prompt: Option<String>, prompt_file: Option<PathBuf>, saved: Option<usize>) -> Self {
        match (prompt, prompt_file, saved) {
            (Some(text), _, _) => Self::Text(text),
            (_, Some(path), _) => Self::File(path),
            (_, _, Some(n)) => Self::Saved(n),
            _ => Self::Default,
        }
    }

    fn resolve(self, config: &Config, default: &str) -> Result<PromptTemplate> {
        let text = match self {
            Self::Default => default.to_string(),
            Self::Text(text) => text,
            Self::File(path) => std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file '{}'", path.display()))?,
            Self::Saved(n) => {
                let prompts = ResultStore::new(&config.results.path).saved_prompts();
                if n == 0 || n > prompts.len() {
                    anyhow::bail!(
                        "No saved prompt #{} ({} saved). Run 'prompts' to list them.",
                        n,
                        prompts.len()
                    );
                }
                prompts[n - 1].clone()
            }
        };
        Ok(PromptTemplate::new(text))
    }
}

struct EvalOptions {
    top_k: Option<u64>,
    sample_size: Option<usize>,
    seed: Option<u64>,
    concurrency: Option<usize>,
    save: bool,
    output: Option<PathBuf>,
}

fn load_config() -> Result<Config> {
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn open_session(config: &Config, corpus: &Path) -> Result<Session> {
    println!("Loading embedding model: {}", config.embedding.model_id);
    let embedder =
        MiniLmEmbedder::load(&config.embedding.model_id).context("Failed to load embedding model")?;

    Session::open(config, corpus, Box::new(embedder)).with_context(|| {
        format!("Failed to open corpus '{}'", corpus.display())
    })
}

fn cmd_index(corpus: &Path, rebuild: bool) -> Result<()> {
    let config = load_config()?;
    let start = Instant::now();

    let mut session = open_session(&config, corpus)?;
    if rebuild {
        println!("Rebuilding vector index...");
        session.rebuild_index().context("Failed to rebuild index")?;
    }

    let store = session.index_store();
    let size = store.size_on_disk()?;

    println!("\nVector Index");
    println!("{}", "─".repeat(40));
    println!("  Corpus:       {}", corpus.display());
    println!("  Documents:    {}", session.index().len());
    println!("  Dimension:    {}", session.index().dimension());
    println!("  Model:        {}", session.index().model_id());
    println!("  Index files:  {}", store.dir().display());
    println!("  Size:         {:.1} KB", size as f64 / 1024.0);
    println!("  Elapsed:      {:.2?}", start.elapsed());

    Ok(())
}

async fn cmd_query(
    corpus: &Path,
    question: &str,
    top_k: Option<u64>,
    source: TemplateSource,
    show_distances: bool,
) -> Result<()> {
    let config = load_config()?;
    let template = source.resolve(&config, DEFAULT_QUERY_TEMPLATE)?;
    let k = top_k.map_or(config.eval.top_k, |k| k as usize);

    let session = open_session(&config, corpus)?;

    println!("Question: \"{}\"", question);
    println!("Using model: {}", config.llm.model);
    println!();

    let start = Instant::now();
    let result = session
        .answer(question, &template, k)
        .await
        .context("Query failed")?;

    println!("Retrieved documents:");
    println!("{}", "─".repeat(60));
    for (i, doc) in result.documents.iter().enumerate() {
        if show_distances {
            println!("{:>2}. [{:.4}] {}", i + 1, doc.distance, doc.document);
        } else {
            println!("{:>2}. {}", i + 1, doc.document);
        }
    }
    println!("{}", "─".repeat(60));

    println!("\nAnswer:\n{}", result.answer);
    println!("\nAnswered in {:.2?}", start.elapsed());

    Ok(())
}

async fn cmd_eval(corpus: &Path, source: TemplateSource, options: EvalOptions) -> Result<()> {
    let config = load_config()?;
    let template = source.resolve(&config, DEFAULT_BATCH_TEMPLATE)?;
    let k = options.top_k.map_or(config.eval.top_k, |k| k as usize);
    let sample_size = options.sample_size.unwrap_or(config.eval.sample_size);
    let concurrency = options.concurrency.unwrap_or(config.eval.concurrency);

    let session = open_session(&config, corpus)?;
    session
        .completer()
        .ping()
        .await
        .with_context(|| format!("Completion server at {} is not reachable", config.llm.base_url))?;

    println!(
        "Evaluating {} questions (top-k {}, model {})",
        sample_size, k, config.llm.model
    );

    let pb = ProgressBar::new(sample_size as u64);
    pb.set_style(ProgressStyle::default_bar().template("{msg} [{bar:40}] {pos}/{len}")?);
    pb.set_message("Questions");

    let start = Instant::now();
    let run = session
        .evaluate(
            &template,
            k,
            sample_size,
            options.seed,
            concurrency,
            &mut |done, _total| pb.set_position(done as u64),
        )
        .await
        .context("Evaluation failed")?;
    pb.finish();

    print_run(&run);
    println!("\nEvaluated in {:.2?}", start.elapsed());

    if let Some(output) = &options.output {
        let json = serde_json::to_string_pretty(&run).context("Failed to serialize run")?;
        std::fs::write(output, json)
            .with_context(|| format!("Failed to write '{}'", output.display()))?;
        println!("Run written to: {}", output.display());
    }

    if options.save {
        let mut store = ResultStore::new(&config.results.path);
        match store.append(&run).context("Failed to save results")? {
            AppendOutcome::Appended => {
                println!("Results saved to: {}", store.path().display())
            }
            AppendOutcome::Duplicate => {
                println!("This prompt is already saved; existing results were kept.")
            }
        }
    }

    Ok(())
}

fn print_run(run: &EvaluationRun) {
    println!("\nPer-question metrics:");
    println!("{}", "─".repeat(60));
    for (i, record) in run.records.iter().enumerate() {
        println!("{:>2}. {}", i + 1, record.question);
        match &record.error {
            Some(error) => println!("    Failed: {}", error),
            None => {
                let preview: String = record.generated_answer.chars().take(200).collect();
                println!("    Answer: {}", preview.replace('\n', " "));
                println!(
                    "    BLEU {:.4}  ROUGE-1 {:.4}  ROUGE-2 {:.4}  ROUGE-L {:.4}  EM {}",
                    record.bleu, record.rouge1, record.rouge2, record.rouge_l, record.exact_match
                );
            }
        }
    }
    println!("{}", "─".repeat(60));

    let avg = &run.averages;
    println!("Average metrics:");
    println!("  BLEU:         {:.4}", avg.bleu);
    println!("  ROUGE-1:      {:.4}", avg.rouge1);
    println!("  ROUGE-2:      {:.4}", avg.rouge2);
    println!("  ROUGE-L:      {:.4}", avg.rouge_l);
    println!("  Exact Match:  {:.4}", avg.exact_match);

    let failures = run.failures();
    if failures > 0 {
        println!("  Failed:       {} of {}", failures, run.records.len());
    }
}

fn cmd_prompts() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let store = ResultStore::new(&config.results.path);
    let summaries = store.list_all();
    let prompts = store.saved_prompts();

    if prompts.is_empty() {
        println!("No saved prompts in {}", store.path().display());
        return Ok(());
    }

    println!("Saved prompts ({})", store.path().display());
    println!("{}", "─".repeat(60));
    for (i, prompt) in prompts.iter().enumerate() {
        println!("{:>2}. {}", i + 1, prompt.replace('\n', "\\n"));

        let Some(summary) = summaries.get(prompt) else {
            continue;
        };
        if let Some(k) = summary.top_k {
            println!("    Top K: {}", k);
        }
        match &summary.averages {
            Some(avg) => println!(
                "    BLEU {:.4}  ROUGE-1 {:.4}  ROUGE-2 {:.4}  ROUGE-L {:.4}  EM {:.4}",
                avg.bleu, avg.rouge1, avg.rouge2, avg.rouge_l, avg.exact_match
            ),
            None => println!("    (no averages stored)"),
        }
    }

    Ok(())
}

async fn cmd_check() -> Result<()> {
    println!("Testing completion server connection...\n");

    let config = Config::load().context("Failed to load configuration")?;

    println!("Configuration:");
    println!("  Server:    {}", config.llm.base_url);
    println!("  Model:     {}", config.llm.model);
    println!("  Timeout:   {}s", config.llm.timeout_secs);
    println!("  Embedding: {}", config.embedding.model_id);
    println!();

    if let Err(e) = config.validate() {
        println!("Configuration error: {}", e);
        return Ok(());
    }

    let client = OllamaClient::new(config.llm.clone())?;

    match client.ping().await {
        Ok(()) => println!("Server is reachable."),
        Err(e) => {
            println!("Connection failed: {}", e);
            return Ok(());
        }
    }

    match client.list_models().await {
        Ok(models) => {
            let available = models.iter().any(|m| {
                m == &config.llm.model || m.split(':').next() == Some(config.llm.model.as_str())
            });
            println!("Models installed: {}", models.len());
            for model in &models {
                println!("  - {}", model);
            }
            if !available {
                println!("\nModel '{}' is not installed on the server.", config.llm.model);
            }
        }
        Err(e) => println!("Failed to list models: {}", e),
    }

    Ok(())
}
