use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use sum_datastore::{CachedRun, ResultStore, StaleRemoval};

/// A store whose every operation fails.
#[derive(Clone, Default)]
pub struct MockDataStore {
    pub attempts: Arc<AtomicUsize>,
}

impl MockDataStore {
    fn fail<T>(&self) -> anyhow::Result<T> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("disk on fire"))
    }
}

impl ResultStore for MockDataStore {
    async fn get_run(&self, _key: &str) -> anyhow::Result<Option<CachedRun>> {
        self.fail()
    }

    async fn put_run(&self, _run: &CachedRun) -> anyhow::Result<()> {
        self.fail()
    }

    async fn remove_stale(&self, _current_fingerprint: &str) -> anyhow::Result<StaleRemoval> {
        self.fail()
    }
}
