//! Memoization of finished runs.
//!
//! A run is keyed by its input texts and its configuration fingerprint, so
//! the same documents summarized with the same settings are answered from
//! the [`ResultStore`] instead of the LLM.

use anyhow::Context;
use sha2::{Digest, Sha256};
use sum_datastore::{CachedRun, ResultStore, StaleRemoval};

use crate::{
    config::RunConfig,
    types::{Document, RunResult, RunStatus},
};

/// Hex SHA-256 over every document text, length-prefixed, followed by the
/// config fingerprint. Filenames do not take part.
pub fn cache_key(documents: &[Document], config: &RunConfig) -> String {
    let mut hasher = Sha256::new();
    for document in documents {
        hasher.update((document.text.len() as u64).to_le_bytes());
        hasher.update(document.text.as_bytes());
    }
    hasher.update(config.fingerprint().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug)]
pub struct SummaryCache<D> {
    store: D,
}

impl<D> SummaryCache<D>
where
    D: ResultStore + Send + Sync,
{
    pub fn new(store: D) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &D {
        &self.store
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, key: &str) -> anyhow::Result<Option<RunResult>> {
        let Some(cached) = self
            .store
            .get_run(key)
            .await
            .context("Failed to read cached run")?
        else {
            return Ok(None);
        };

        let result = cached
            .decode::<RunResult>()
            .context("Cached run has an unexpected shape")?;
        Ok(Some(result))
    }

    /// Stores `result` if it is complete. Partial runs and runs whose final
    /// summary failed are skipped so a later run can fill the gaps.
    #[tracing::instrument(skip_all, fields(key = %key, run_id = %result.run_id))]
    pub async fn put(&self, key: &str, config: &RunConfig, result: &RunResult) -> anyhow::Result<bool> {
        if result.status != RunStatus::Completed || result.final_error.is_some() {
            tracing::debug!(status = ?result.status, "Run not cached, it is incomplete");
            return Ok(false);
        }

        let record = CachedRun::new(key, config.fingerprint(), result.run_id.0, result)?;
        self.store
            .put_run(&record)
            .await
            .context("Failed to store run")?;
        Ok(true)
    }

    /// Drops every cached run made under a different configuration.
    #[tracing::instrument(skip_all)]
    pub async fn invalidate_stale(&self, config: &RunConfig) -> anyhow::Result<StaleRemoval> {
        let removal = self
            .store
            .remove_stale(&config.fingerprint())
            .await
            .context("Failed to invalidate stale runs")?;

        if !removal.removed_keys.is_empty() {
            tracing::info!(
                removed = removal.removed_keys.len(),
                retained = removal.retained,
                "Invalidated cached runs after a configuration change"
            );
        }
        Ok(removal)
    }
}
