use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use sum_datastore::{FsStore, MemoryStore, ResultStore};
use sum_pulse::{
    assembler::{export, ArtifactSink, DirectorySink},
    config::{ModelCatalog, RunConfig},
    openai::OpenAIClient,
    tokenizer::TiktokenTokenizer,
    tracing::init_tracing_subscriber,
    types::Document,
    SummaryProcessor, SummaryProcessorBuilder,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "sum-pulse", about = "Summarize long documents with chunked LLM calls")]
struct Cli {
    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_key: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = OpenAIClient::DEFAULT_BASE_URL)]
    base_url: String,

    /// Retries for transient request failures
    #[arg(long, env = "SUM_PULSE_MAX_RETRIES", default_value = "0")]
    max_retries: u32,

    /// Run configuration file (JSON)
    #[arg(long, env = "SUM_PULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Model catalog file (JSON), replaces the built-in table
    #[arg(long, env = "SUM_PULSE_MODELS")]
    models: Option<PathBuf>,

    /// Directory holding cached runs
    #[arg(long, env = "SUM_PULSE_CACHE_DIR", default_value = "/var/tmp/sum-pulse")]
    cache_dir: PathBuf,

    /// Overrides the configured model
    #[arg(long)]
    model: Option<String>,

    /// Overrides the configured chunk size
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Send chunks one at a time
    #[arg(long)]
    legacy: bool,

    /// Skip the final summary
    #[arg(long)]
    no_final: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Segment the input and print the token and cost estimate
    Estimate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Summarize the input and write the markdown summary
    Run {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Directory the summary is written to
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Manage the run configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write a default configuration file
    Init {
        #[arg(default_value = "sum-pulse.json")]
        path: PathBuf,

        /// Output language for the default personas
        #[arg(long, default_value = "English")]
        language: String,
    },
}

impl Cli {
    fn run_config(&self) -> anyhow::Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => RunConfig::default(),
        };

        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        config.legacy_mode |= self.legacy;
        config.final_summary &= !self.no_final;

        Ok(config)
    }

    fn catalog(&self) -> anyhow::Result<ModelCatalog> {
        match &self.models {
            Some(path) => ModelCatalog::load(path)
                .with_context(|| format!("Failed to load {}", path.display())),
            None => Ok(ModelCatalog::builtin()),
        }
    }

    fn processor<D>(
        &self,
        store: D,
        config: &RunConfig,
        openai_key: &str,
    ) -> anyhow::Result<SummaryProcessor<D, OpenAIClient, TiktokenTokenizer>>
    where
        D: ResultStore + Send + Sync + 'static,
    {
        let tokenizer = TiktokenTokenizer::for_model(&config.model)?;
        let openai = OpenAIClient::new(openai_key)
            .with_base_url(&self.base_url)
            .with_max_retries(self.max_retries);

        Ok(SummaryProcessorBuilder::new()
            .store(store)
            .summarizer(openai)
            .tokenizer(tokenizer)
            .catalog(self.catalog()?)
            .build())
    }
}

async fn read_documents(files: &[PathBuf]) -> anyhow::Result<Vec<Document>> {
    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let document = Document::from_bytes(filename, bytes)
            .with_context(|| format!("{} is not a text file", path.display()))?;
        documents.push(document);
    }
    Ok(documents)
}

async fn estimate(cli: &Cli, files: &[PathBuf]) -> anyhow::Result<()> {
    let config = cli.run_config()?;
    let documents = read_documents(files).await?;
    // preflight touches neither the network nor the cache
    let processor = cli.processor(
        MemoryStore::new(),
        &config,
        cli.openai_key.as_deref().unwrap_or_default(),
    )?;

    let preflight = processor.preflight(&documents, &config)?;
    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "model": preflight.model.name,
        "chunks": preflight.chunks.len(),
        "estimate": preflight.estimate,
        "estimated_price": preflight.estimated_price,
        "budget_exceeded": preflight.budget.as_ref().map(|b| b.to_string()),
        "segmentation_failures": preflight.segmentation_failures,
    }))?);

    Ok(())
}

async fn run(cli: &Cli, files: &[PathBuf], out_dir: &Path) -> anyhow::Result<()> {
    let config = cli.run_config()?;
    let openai_key = cli
        .openai_key
        .as_deref()
        .context("OPENAI_API_KEY not set")?;
    let documents = read_documents(files).await?;
    let store = FsStore::init(&cli.cache_dir).await?;
    let processor = cli.processor(store, &config, openai_key)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling run");
                cancel.cancel();
            }
        }
    });

    let mut progress = processor.subscribe();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = *progress.borrow_and_update();
            tracing::info!(completed = p.completed, total = p.total, "Progress");
        }
    });

    let report = processor
        .run_with_cancel(&documents, &config, cancel)
        .await
        .inspect_err(|e| tracing::error!(error = %e, "Summarization failed"))?;

    for warning in report.result.warnings() {
        tracing::warn!(chunk_id = warning.chunk_id, "Chunk summary truncated, raise max_tokens_rec");
    }
    for failure in &report.result.failures {
        tracing::warn!(chunk_id = failure.chunk_id, error = %failure.error, "Chunk has no summary");
    }

    let artifact = export(&report.result, &chrono::Local::now());
    let path = DirectorySink::new(out_dir).save(&artifact).await?;

    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "summary": path,
        "status": report.result.status,
        "cache_hit": report.cache_hit,
        "total_tokens": report.result.total_tokens,
        "total_price": report.result.total_price,
        "estimated_price": report.estimated_price,
    }))?);

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let _guard = sentry::init((
        std::env::var("SENTRY_DSN").unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some("production".into()),
            ..Default::default()
        },
    ));

    init_tracing_subscriber()?;

    let cli = Cli::parse();

    match &cli.command {
        Command::Estimate { files } => estimate(&cli, files).await,
        Command::Run { files, out_dir } => run(&cli, files, out_dir).await,
        Command::Config {
            command: ConfigCommand::Init { path, language },
        } => {
            RunConfig::for_language(language)
                .save(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "Wrote default configuration");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use super::*;

    #[tokio::test]
    async fn test_estimate_leaves_cache_dir_alone() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("notes.txt");
        std::fs::write(&input, "The committee met on Tuesday. It adjourned early.").unwrap();
        let cache_dir = dir.path().join("cache");

        let cli = Cli::try_parse_from([
            OsString::from("sum-pulse"),
            "--cache-dir".into(),
            cache_dir.clone().into_os_string(),
            "estimate".into(),
            input.clone().into_os_string(),
        ])
        .unwrap();

        estimate(&cli, std::slice::from_ref(&input)).await.unwrap();

        assert!(!cache_dir.exists());
    }
}
