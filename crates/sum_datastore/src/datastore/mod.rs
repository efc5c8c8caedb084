use std::future::Future;

use crate::CachedRun;

pub mod fs;
pub mod memory;

pub trait ResultStore {
    fn get_run(&self, key: &str) -> impl Future<Output = anyhow::Result<Option<CachedRun>>> + Send;

    fn put_run(&self, run: &CachedRun) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Drops every record whose configuration fingerprint differs from
    /// `current_fingerprint`.
    fn remove_stale(
        &self,
        current_fingerprint: &str,
    ) -> impl Future<Output = anyhow::Result<StaleRemoval>> + Send;
}

impl<T: ResultStore + Send + Sync> ResultStore for &T {
    async fn get_run(&self, key: &str) -> anyhow::Result<Option<CachedRun>> {
        (**self).get_run(key).await
    }

    async fn put_run(&self, run: &CachedRun) -> anyhow::Result<()> {
        (**self).put_run(run).await
    }

    async fn remove_stale(&self, current_fingerprint: &str) -> anyhow::Result<StaleRemoval> {
        (**self).remove_stale(current_fingerprint).await
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct StaleRemoval {
    pub removed_keys: Vec<String>,
    pub retained: usize,
}
