use serde::Serialize;
use sum_datastore::ResultStore;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    cache::{cache_key, SummaryCache},
    config::{ChunkUnit, ModelSpec, RunConfig},
    error::{BudgetExceeded, LlmRequestError, PipelineError, RunError},
    estimator::{check_budget, estimate, estimate_price, TokenEstimate},
    segmenter::{segment_documents, DocumentFailure, Segmenter},
    tokenizer::Tokenizer,
    types::{Chunk, ChunkError, Document, Progress, RunResult},
    SummarizationOrchestrator, Summarizer,
};

pub mod builder;

/// Everything known about a run before any request is sent.
#[derive(Debug, Clone, Serialize)]
pub struct Preflight {
    pub chunks: Vec<Chunk>,
    pub segmentation_failures: Vec<DocumentFailure>,
    pub estimate: TokenEstimate,
    pub estimated_price: f64,
    /// Set when the run would overflow the model's context window.
    pub budget: Option<BudgetExceeded>,
    pub model: ModelSpec,
}

impl Preflight {
    pub fn is_blocked(&self) -> bool {
        self.budget.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub result: RunResult,
    pub chunks: Vec<Chunk>,
    pub estimate: TokenEstimate,
    pub estimated_price: f64,
    pub segmentation_failures: Vec<DocumentFailure>,
    pub cache_hit: bool,
}

// Documents in, summaries out
pub struct SummaryProcessor<D, S, K>
where
    D: ResultStore + Send + Sync + 'static,
    S: Summarizer + Send + Sync + 'static,
    K: Tokenizer + 'static,
{
    cache: SummaryCache<D>,
    orchestrator: SummarizationOrchestrator<S>,
    tokenizer: K,
}

impl<D, S, K> SummaryProcessor<D, S, K>
where
    D: ResultStore + Send + Sync + 'static,
    S: Summarizer + Send + Sync + 'static,
    K: Tokenizer + 'static,
{
    pub fn orchestrator(&self) -> &SummarizationOrchestrator<S> {
        &self.orchestrator
    }

    pub fn cache(&self) -> &SummaryCache<D> {
        &self.cache
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.orchestrator.subscribe()
    }

    pub fn latest_result(&self) -> Option<RunResult> {
        self.orchestrator.latest_result()
    }

    /// Validates `config`, segments `documents` and prices the run. Never
    /// touches the network.
    #[tracing::instrument(skip_all, fields(documents = documents.len(), model = %config.model))]
    pub fn preflight(
        &self,
        documents: &[Document],
        config: &RunConfig,
    ) -> Result<Preflight, PipelineError> {
        config
            .validate()
            .inspect_err(|e| tracing::error!(error = %e, "Invalid run configuration"))?;
        let model = self.orchestrator.catalog().get(&config.model)?.clone();
        config.validate_against(&model)?;

        let segmenter = Segmenter::new(config.chunk_size).language_family(config.language_family);
        let segmenter = match config.chunk_unit {
            ChunkUnit::Tokens => segmenter.by_tokens(&self.tokenizer),
            ChunkUnit::Words => segmenter,
        };

        let segmented = segment_documents(documents, &segmenter);
        if !documents.is_empty() && segmented.failures.len() == documents.len() {
            return Err(PipelineError::Segmentation(segmented.failures));
        }

        let estimate = estimate(&segmented.chunks, config, &self.tokenizer);
        let estimated_price = estimate_price(&estimate, &model.pricing);
        let budget = check_budget(
            &segmented.chunks,
            config,
            &self.tokenizer,
            model.context_window,
        )
        .err();

        tracing::info!(
            chunks = segmented.chunks.len(),
            total_tokens = estimate.total_tokens,
            estimated_price,
            blocked = budget.is_some(),
            "Preflight done"
        );

        Ok(Preflight {
            chunks: segmented.chunks,
            segmentation_failures: segmented.failures,
            estimate,
            estimated_price,
            budget,
            model,
        })
    }

    pub async fn run(
        &self,
        documents: &[Document],
        config: &RunConfig,
    ) -> Result<RunReport, PipelineError> {
        self.run_with_cancel(documents, config, CancellationToken::new())
            .await
    }

    /// Full pipeline: preflight, budget gate, cache lookup, summarization,
    /// cache store.
    ///
    /// Cache failures are logged and otherwise ignored.
    #[tracing::instrument(skip_all, fields(documents = documents.len()))]
    pub async fn run_with_cancel(
        &self,
        documents: &[Document],
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        let Preflight {
            chunks,
            segmentation_failures,
            estimate,
            estimated_price,
            budget,
            ..
        } = self.preflight(documents, config)?;

        if let Some(exceeded) = budget {
            tracing::warn!(phase = %exceeded.phase(), reason = %exceeded, "Run blocked by token budget");
            return Err(exceeded.into());
        }

        let key = cache_key(documents, config);
        if let Err(e) = self.cache.invalidate_stale(config).await {
            tracing::warn!(error = ?e, "Failed to invalidate stale cached runs");
        }

        match self.cache.get(&key).await {
            Ok(Some(cached)) => {
                let result = self.orchestrator.adopt(cached);
                tracing::info!(key = %key, run_id = %result.run_id, "Serving run from cache");
                return Ok(RunReport {
                    result,
                    chunks,
                    estimate,
                    estimated_price,
                    segmentation_failures,
                    cache_hit: true,
                });
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = ?e, "Cache lookup failed, summarizing anyway"),
        }

        let result = self
            .orchestrator
            .run_with_cancel(&chunks, config, cancel)
            .await?;

        if let Err(e) = self.cache.put(&key, config, &result).await {
            tracing::warn!(error = ?e, "Failed to cache run");
        }

        Ok(RunReport {
            result,
            chunks,
            estimate,
            estimated_price,
            segmentation_failures,
            cache_hit: false,
        })
    }

    /// Retries every failed chunk of a report once, then redoes the final
    /// summary if the config asks for one and nothing is left failing.
    ///
    /// The outcome becomes the latest result unless a newer run has started,
    /// and is cached once complete.
    #[tracing::instrument(
        skip_all,
        fields(run_id = %report.result.run_id, failed = report.result.failures.len())
    )]
    pub async fn retry_failures(
        &self,
        documents: &[Document],
        report: RunReport,
        config: &RunConfig,
    ) -> Result<RunResult, RunError> {
        let RunReport {
            mut result, chunks, ..
        } = report;
        let failed = result.failed_chunk_ids();

        for chunk in chunks.iter().filter(|c| failed.contains(&c.id())) {
            match self.orchestrator.retry_chunk(chunk, config).await {
                Ok(summary) => result = result.with_retry(summary),
                Err(ChunkError {
                    chunk_id,
                    error: LlmRequestError::Authentication { message },
                    ..
                }) => {
                    return Err(RunError::Authentication {
                        run_id: result.run_id,
                        chunk_id,
                        message,
                    });
                }
                Err(_) => {}
            }
        }

        if config.final_summary && result.failures.is_empty() && result.final_summary.is_none() {
            // commits through the ledger itself
            result = self.orchestrator.reduce(result, config).await?;
        } else if !self.orchestrator.commit(&result) {
            tracing::info!("A newer run has started, retried result not kept as latest");
        }

        let key = cache_key(documents, config);
        if let Err(e) = self.cache.put(&key, config, &result).await {
            tracing::warn!(error = ?e, "Failed to cache retried run");
        }
        Ok(result)
    }
}
