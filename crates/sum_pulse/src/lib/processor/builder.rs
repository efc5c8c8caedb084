use sum_datastore::ResultStore;

use crate::{
    cache::SummaryCache, config::ModelCatalog, tokenizer::Tokenizer, OrchestratorBuilder,
    SummaryProcessor, Summarizer,
};

pub struct SummaryProcessorBuilder<D = (), S = (), K = ()> {
    store: D,
    summarizer: S,
    tokenizer: K,
    catalog: ModelCatalog,
}

impl SummaryProcessorBuilder {
    pub fn new() -> Self {
        Self {
            store: (),
            summarizer: (),
            tokenizer: (),
            catalog: ModelCatalog::builtin(),
        }
    }
}

impl Default for SummaryProcessorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<D, S, K> SummaryProcessorBuilder<D, S, K> {
    pub fn store<D2: ResultStore + Send + Sync + 'static>(
        self,
        store: D2,
    ) -> SummaryProcessorBuilder<D2, S, K> {
        SummaryProcessorBuilder {
            store,
            summarizer: self.summarizer,
            tokenizer: self.tokenizer,
            catalog: self.catalog,
        }
    }

    pub fn summarizer<S2: Summarizer + Send + Sync + 'static>(
        self,
        summarizer: S2,
    ) -> SummaryProcessorBuilder<D, S2, K> {
        SummaryProcessorBuilder {
            store: self.store,
            summarizer,
            tokenizer: self.tokenizer,
            catalog: self.catalog,
        }
    }

    pub fn tokenizer<K2: Tokenizer + 'static>(self, tokenizer: K2) -> SummaryProcessorBuilder<D, S, K2> {
        SummaryProcessorBuilder {
            store: self.store,
            summarizer: self.summarizer,
            tokenizer,
            catalog: self.catalog,
        }
    }

    pub fn catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }
}

impl<D, S, K> SummaryProcessorBuilder<D, S, K>
where
    D: ResultStore + Send + Sync + 'static,
    S: Summarizer + Send + Sync + 'static,
    K: Tokenizer + 'static,
{
    pub fn build(self) -> SummaryProcessor<D, S, K> {
        SummaryProcessor {
            cache: SummaryCache::new(self.store),
            orchestrator: OrchestratorBuilder::new()
                .summarizer(self.summarizer)
                .catalog(self.catalog)
                .build(),
            tokenizer: self.tokenizer,
        }
    }
}
