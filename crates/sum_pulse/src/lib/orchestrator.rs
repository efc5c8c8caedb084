use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{stream::FuturesUnordered, FutureExt, StreamExt};
use itertools::Itertools;
use tokio::{
    sync::{watch, Semaphore},
    task::{JoinError, JoinHandle},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{ModelCatalog, ModelPricing, RunConfig},
    error::{LlmRequestError, ReductionPassError, RunError},
    estimator::calculate_price,
    llm::summarizer::{Completion, CompletionRequest, Pass, Summarizer},
    types::{
        Chunk, ChunkError, ChunkSummary, FinalSummary, FinishReason, Progress, RunId, RunResult,
    },
};

pub mod builder;
pub mod ledger;

use ledger::RunLedger;

type RequestHandle = JoinHandle<Option<Result<Completion, LlmRequestError>>>;

/// Collected chunk outcomes, ordered by chunk id.
#[derive(Debug, Default)]
struct FanIn {
    summaries: Vec<ChunkSummary>,
    failures: Vec<ChunkError>,
}

impl FanIn {
    fn reorder(mut self) -> Self {
        self.summaries.sort_by_key(|s| s.chunk_id);
        self.failures.sort_by_key(|f| f.chunk_id);
        self
    }
}

/// Dispatches chunk requests, gathers the answers and runs the reduction pass.
pub struct SummarizationOrchestrator<S> {
    summarizer: Arc<S>,
    catalog: ModelCatalog,
    next_run_id: AtomicU64,
    progress: watch::Sender<Progress>,
    ledger: RunLedger,
}

impl<S> SummarizationOrchestrator<S>
where
    S: Summarizer + Send + Sync + 'static,
{
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// The result of the newest run that has finished.
    pub fn latest_result(&self) -> Option<RunResult> {
        self.ledger.latest()
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    fn report(&self, run_id: RunId, completed: usize, total: usize) {
        self.progress.send_replace(Progress {
            run_id: Some(run_id),
            completed,
            total,
        });
    }

    fn pricing_for(&self, model: &str) -> Option<ModelPricing> {
        self.catalog
            .get(model)
            .map(|spec| spec.pricing)
            .inspect_err(|e| tracing::warn!(error = %e, "No pricing for model, costs will read 0"))
            .ok()
    }

    fn chunk_summary(
        chunk_id: usize,
        source_id: usize,
        completion: Completion,
        pricing: Option<ModelPricing>,
    ) -> ChunkSummary {
        if completion.finish_reason == FinishReason::Length {
            tracing::warn!(chunk_id, "Chunk summary was cut off at max_tokens");
        }

        ChunkSummary {
            chunk_id,
            source_id,
            price: pricing.map_or(0.0, |p| calculate_price(&completion.usage, &p)),
            content: completion.text,
            finish_reason: completion.finish_reason,
            token_usage: completion.usage,
        }
    }

    /// Spawns one request. The task gives up without calling the backend
    /// once `abort` fires, and waits on `gate` for a slot when one is set.
    ///
    /// A fatal outcome fires `abort` before the slot is released.
    fn spawn_request(
        &self,
        request: CompletionRequest,
        gate: Option<Arc<Semaphore>>,
        abort: CancellationToken,
    ) -> RequestHandle {
        let summarizer = Arc::clone(&self.summarizer);

        tokio::spawn(async move {
            let _permit = match gate {
                Some(gate) => tokio::select! {
                    permit = gate.acquire_owned() => permit.ok(),
                    _ = abort.cancelled() => return None,
                },
                None => None,
            };
            if abort.is_cancelled() {
                return None;
            }
            let outcome = summarizer.complete(request).await;
            if outcome.as_ref().is_err_and(LlmRequestError::is_fatal) {
                abort.cancel();
            }
            Some(outcome)
        })
    }

    fn joined_outcome(
        joined: Result<Option<Result<Completion, LlmRequestError>>, JoinError>,
    ) -> Option<Result<Completion, LlmRequestError>> {
        match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = ?e, "Request task failed");
                Some(Err(LlmRequestError::Internal {
                    message: e.to_string(),
                }))
            }
        }
    }

    fn next_run_id(&self) -> RunId {
        RunId(self.next_run_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Serves a result produced elsewhere (a cache hit) as a new run: it gets
    /// a fresh [`RunId`] and becomes the latest result.
    pub fn adopt(&self, mut result: RunResult) -> RunResult {
        let run_id = self.next_run_id();
        self.ledger.start(run_id);
        tracing::debug!(from = %result.run_id, to = %run_id, "Adopting result");

        result.run_id = run_id;
        let total = result.chunk_summaries.len() + result.failures.len();
        self.report(run_id, total, total);
        self.ledger.commit(&result);
        result
    }

    /// Keeps `result` as the latest unless a newer run has started.
    pub fn commit(&self, result: &RunResult) -> bool {
        self.ledger.commit(result)
    }

    pub async fn run(&self, chunks: &[Chunk], config: &RunConfig) -> Result<RunResult, RunError> {
        self.run_with_cancel(chunks, config, CancellationToken::new())
            .await
    }

    /// Summarizes every chunk, then reduces the chunk summaries into a final
    /// summary when the config asks for one.
    ///
    /// Chunk failures are recorded in the result. An authentication failure
    /// or a cancellation ends the run with an error and no result.
    #[tracing::instrument(
        skip_all,
        fields(
            run_id = tracing::field::Empty,
            chunks = chunks.len(),
            legacy = config.legacy_mode,
        )
    )]
    pub async fn run_with_cancel(
        &self,
        chunks: &[Chunk],
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<RunResult, RunError> {
        let run_id = self.next_run_id();
        tracing::Span::current().record("run_id", run_id.0);
        self.ledger.start(run_id);

        // later edits to the caller's config do not reach this run
        let config = Arc::new(config.clone());
        let pricing = self.pricing_for(&config.model);
        let ordered = chunks.iter().sorted_by_key(|c| c.id()).collect::<Vec<_>>();

        self.report(run_id, 0, ordered.len());
        tracing::info!(model = %config.model, "Starting summarization run");

        let fan_in = if config.legacy_mode {
            self.run_sequential(run_id, &ordered, &config, pricing, &cancel)
                .await?
        } else {
            self.run_concurrent(run_id, &ordered, &config, pricing, &cancel)
                .await?
        };

        let (final_summary, final_error) = if config.final_summary {
            self.reduction_pass(run_id, &fan_in, &config, pricing, &cancel)
                .await?
        } else {
            (None, None)
        };

        let result = RunResult::from_parts(
            run_id,
            fan_in.summaries,
            fan_in.failures,
            final_summary,
            final_error,
        );
        tracing::info!(
            status = ?result.status,
            total_tokens = result.total_tokens,
            total_price = result.total_price,
            "Run finished"
        );

        if !self.ledger.commit(&result) {
            tracing::info!("A newer run has started, result not kept as latest");
        }
        Ok(result)
    }

    #[tracing::instrument(skip_all, fields(limit = ?config.concurrency_limit))]
    async fn run_concurrent(
        &self,
        run_id: RunId,
        chunks: &[&Chunk],
        config: &Arc<RunConfig>,
        pricing: Option<ModelPricing>,
        cancel: &CancellationToken,
    ) -> Result<FanIn, RunError> {
        let gate = config
            .concurrency_limit
            .map(|limit| Arc::new(Semaphore::new(limit)));
        let abort = cancel.child_token();

        let mut in_flight = chunks
            .iter()
            .map(|chunk| {
                let request =
                    CompletionRequest::for_pass(config, Pass::Recursive, chunk.content());
                let (chunk_id, source_id) = (chunk.id(), chunk.source_id());
                tracing::debug!(chunk_id, "Dispatching chunk");

                self.spawn_request(request, gate.clone(), abort.clone())
                    .map(move |joined| (chunk_id, source_id, joined))
            })
            .collect::<FuturesUnordered<_>>();

        let mut fan_in = FanIn::default();
        let mut auth_failure = None;
        let mut completed = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!("Run cancelled, in-flight results will be discarded");
                    return Err(RunError::Cancelled { run_id });
                }
                next = in_flight.next() => next,
            };
            let Some((chunk_id, source_id, joined)) = next else {
                break;
            };
            // skipped after an abort, never reached the backend
            let Some(outcome) = Self::joined_outcome(joined) else {
                continue;
            };

            completed += 1;
            self.report(run_id, completed, chunks.len());

            match outcome {
                Ok(completion) => fan_in.summaries.push(Self::chunk_summary(
                    chunk_id, source_id, completion, pricing,
                )),
                Err(LlmRequestError::Authentication { message }) => {
                    tracing::error!(chunk_id, %message, "Authentication failed, stopping dispatch");
                    abort.cancel();
                    auth_failure.get_or_insert((chunk_id, message));
                }
                Err(error) => {
                    tracing::warn!(
                        chunk_id,
                        %error,
                        retryable = error.is_retryable(),
                        "Chunk request failed"
                    );
                    fan_in.failures.push(ChunkError {
                        chunk_id,
                        source_id,
                        error,
                    });
                }
            }
        }

        if let Some((chunk_id, message)) = auth_failure {
            return Err(RunError::Authentication {
                run_id,
                chunk_id,
                message,
            });
        }
        Ok(fan_in.reorder())
    }

    /// One request at a time in chunk order, pausing `delay_secs` between
    /// requests.
    #[tracing::instrument(skip_all, fields(delay_secs = config.delay_secs))]
    async fn run_sequential(
        &self,
        run_id: RunId,
        chunks: &[&Chunk],
        config: &Arc<RunConfig>,
        pricing: Option<ModelPricing>,
        cancel: &CancellationToken,
    ) -> Result<FanIn, RunError> {
        let delay = Duration::try_from_secs_f64(config.delay_secs).unwrap_or_default();
        let mut fan_in = FanIn::default();

        for (index, chunk) in chunks.iter().enumerate() {
            let request = CompletionRequest::for_pass(config, Pass::Recursive, chunk.content());
            let handle = self.spawn_request(request, None, cancel.child_token());

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RunError::Cancelled { run_id }),
                joined = handle => joined,
            };
            let Some(outcome) = Self::joined_outcome(joined) else {
                return Err(RunError::Cancelled { run_id });
            };
            self.report(run_id, index + 1, chunks.len());

            match outcome {
                Ok(completion) => fan_in.summaries.push(Self::chunk_summary(
                    chunk.id(),
                    chunk.source_id(),
                    completion,
                    pricing,
                )),
                Err(LlmRequestError::Authentication { message }) => {
                    tracing::error!(chunk_id = chunk.id(), %message, "Authentication failed");
                    return Err(RunError::Authentication {
                        run_id,
                        chunk_id: chunk.id(),
                        message,
                    });
                }
                Err(error) => {
                    tracing::warn!(chunk_id = chunk.id(), %error, "Chunk request failed");
                    fan_in.failures.push(ChunkError {
                        chunk_id: chunk.id(),
                        source_id: chunk.source_id(),
                        error,
                    });
                }
            }

            if !delay.is_zero() && index + 1 < chunks.len() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RunError::Cancelled { run_id }),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Ok(fan_in)
    }

    #[tracing::instrument(skip_all)]
    async fn reduction_pass(
        &self,
        run_id: RunId,
        fan_in: &FanIn,
        config: &RunConfig,
        pricing: Option<ModelPricing>,
        cancel: &CancellationToken,
    ) -> Result<(Option<FinalSummary>, Option<ReductionPassError>), RunError> {
        if !fan_in.failures.is_empty() {
            let failed = fan_in.failures.iter().map(|f| f.chunk_id).collect::<Vec<_>>();
            tracing::warn!(?failed, "Skipping final summary, some chunks have no summary");
            return Ok((None, Some(ReductionPassError::IncompleteChunks { failed })));
        }
        if fan_in.summaries.is_empty() {
            return Ok((None, None));
        }

        let joined = fan_in.summaries.iter().map(|s| s.content.as_str()).join(" ");
        let request = CompletionRequest::for_pass(config, Pass::Final, joined);
        let handle = self.spawn_request(request, None, cancel.child_token());

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled { run_id }),
            joined = handle => joined,
        };
        let Some(outcome) = Self::joined_outcome(joined) else {
            return Err(RunError::Cancelled { run_id });
        };

        match outcome {
            Ok(completion) => {
                if completion.finish_reason == FinishReason::Length {
                    tracing::warn!("Final summary was cut off at max_tokens");
                }
                let price = pricing.map_or(0.0, |p| calculate_price(&completion.usage, &p));
                Ok((
                    Some(FinalSummary {
                        content: completion.text,
                        finish_reason: completion.finish_reason,
                        token_usage: completion.usage,
                        price,
                    }),
                    None,
                ))
            }
            Err(error) => {
                tracing::error!(%error, "Final summary request failed");
                Ok((None, Some(ReductionPassError::Request { error })))
            }
        }
    }

    /// Sends one chunk again outside of any run. Fold a success back in with
    /// [`RunResult::with_retry`].
    #[tracing::instrument(skip_all, fields(chunk_id = chunk.id()))]
    pub async fn retry_chunk(
        &self,
        chunk: &Chunk,
        config: &RunConfig,
    ) -> Result<ChunkSummary, ChunkError> {
        let pricing = self.pricing_for(&config.model);
        let request = CompletionRequest::for_pass(config, Pass::Recursive, chunk.content());

        self.summarizer
            .complete(request)
            .await
            .map(|completion| {
                Self::chunk_summary(chunk.id(), chunk.source_id(), completion, pricing)
            })
            .map_err(|error| ChunkError {
                chunk_id: chunk.id(),
                source_id: chunk.source_id(),
                error,
            })
            .inspect_err(|e| tracing::warn!(error = %e.error, "Retry failed"))
    }

    /// Runs the reduction pass again over an existing result, typically after
    /// failed chunks were retried. Returns the superseding result.
    #[tracing::instrument(skip_all, fields(run_id = %result.run_id))]
    pub async fn reduce(&self, result: RunResult, config: &RunConfig) -> Result<RunResult, RunError> {
        let pricing = self.pricing_for(&config.model);
        let RunResult {
            run_id,
            chunk_summaries,
            failures,
            ..
        } = result;
        let fan_in = FanIn {
            summaries: chunk_summaries,
            failures,
        }
        .reorder();

        let (final_summary, final_error) = self
            .reduction_pass(run_id, &fan_in, config, pricing, &CancellationToken::new())
            .await?;

        let result = RunResult::from_parts(
            run_id,
            fan_in.summaries,
            fan_in.failures,
            final_summary,
            final_error,
        );
        self.ledger.commit(&result);
        Ok(result)
    }
}
