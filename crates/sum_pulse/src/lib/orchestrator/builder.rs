use std::sync::{atomic::AtomicU64, Arc};

use tokio::sync::watch;

use crate::{
    config::ModelCatalog, orchestrator::ledger::RunLedger, types::Progress,
    SummarizationOrchestrator, Summarizer,
};

pub struct OrchestratorBuilder<S = ()> {
    summarizer: S,
    catalog: ModelCatalog,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            summarizer: (),
            catalog: ModelCatalog::builtin(),
        }
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> OrchestratorBuilder<S> {
    pub fn summarizer<S2: Summarizer + Send + Sync + 'static>(
        self,
        summarizer: S2,
    ) -> OrchestratorBuilder<S2> {
        OrchestratorBuilder {
            summarizer,
            catalog: self.catalog,
        }
    }

    /// Model table used to price each completion.
    pub fn catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }
}

impl<S> OrchestratorBuilder<S>
where
    S: Summarizer + Send + Sync + 'static,
{
    pub fn build(self) -> SummarizationOrchestrator<S> {
        let (progress, _) = watch::channel(Progress::default());

        SummarizationOrchestrator {
            summarizer: Arc::new(self.summarizer),
            catalog: self.catalog,
            next_run_id: AtomicU64::new(0),
            progress,
            ledger: RunLedger::new(),
        }
    }
}
