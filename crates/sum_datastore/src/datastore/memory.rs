use std::{collections::HashMap, sync::Arc};

use itertools::Itertools;
use tokio::sync::RwLock;

use crate::{datastore::ResultStore, CachedRun, StaleRemoval};

/// Process-local store. Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    runs: Arc<RwLock<HashMap<String, CachedRun>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}

impl ResultStore for MemoryStore {
    async fn get_run(&self, key: &str) -> anyhow::Result<Option<CachedRun>> {
        Ok(self.runs.read().await.get(key).cloned())
    }

    async fn put_run(&self, run: &CachedRun) -> anyhow::Result<()> {
        let mut runs = self.runs.write().await;
        // a newer record for the same key wins; a late write from an older run does not
        if let Some(existing) = runs.get(&run.key) {
            if existing.run_id > run.run_id {
                tracing::debug!(key = %run.key, run_id = run.run_id, "Ignoring superseded run");
                return Ok(());
            }
        }
        runs.insert(run.key.clone(), run.clone());
        Ok(())
    }

    async fn remove_stale(&self, current_fingerprint: &str) -> anyhow::Result<StaleRemoval> {
        let mut runs = self.runs.write().await;
        let removed_keys = runs
            .iter()
            .filter(|(_, run)| run.config_fingerprint != current_fingerprint)
            .map(|(key, _)| key.clone())
            .sorted()
            .collect::<Vec<_>>();

        for key in &removed_keys {
            runs.remove(key);
        }

        Ok(StaleRemoval {
            removed_keys,
            retained: runs.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, fingerprint: &str, run_id: u64) -> CachedRun {
        CachedRun::new(key, fingerprint, run_id, &format!("payload-{run_id}")).unwrap()
    }

    #[tokio::test]
    async fn test_put_then_get_returns_record() {
        let store = MemoryStore::new();
        store.put_run(&record("k1", "fp", 1)).await.unwrap();

        let fetched = store.get_run("k1").await.unwrap().expect("record should exist");
        assert_eq!(fetched.run_id, 1);
        assert!(store.get_run("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_older_run_does_not_overwrite_newer() {
        let store = MemoryStore::new();
        store.put_run(&record("k1", "fp", 5)).await.unwrap();
        store.put_run(&record("k1", "fp", 2)).await.unwrap();

        let fetched = store.get_run("k1").await.unwrap().unwrap();
        assert_eq!(fetched.run_id, 5);
    }

    #[tokio::test]
    async fn test_remove_stale_keeps_matching_fingerprint() {
        let store = MemoryStore::new();
        store.put_run(&record("a", "old", 1)).await.unwrap();
        store.put_run(&record("b", "new", 2)).await.unwrap();
        store.put_run(&record("c", "old", 3)).await.unwrap();

        let removal = store.remove_stale("new").await.unwrap();
        assert_eq!(removal.removed_keys, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(removal.retained, 1);
        assert_eq!(store.len().await, 1);
    }
}
