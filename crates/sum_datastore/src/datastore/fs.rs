use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::{datastore::ResultStore, domain::is_valid_key, CachedRun, StaleRemoval};

/// Directory-backed store: one `<key>.json` file per record.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Creates the cache directory if it does not exist yet
    pub async fn init(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .inspect_err(|e| tracing::error!(error = ?e, path = ?root, "Failed to create cache directory"))
            .with_context(|| format!("Failed to create cache directory {}", root.display()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: &str) -> anyhow::Result<PathBuf> {
        if !is_valid_key(key) {
            anyhow::bail!("Invalid cache key: {key:?}");
        }
        Ok(self.root.join(format!("{key}.json")))
    }

    async fn read_record(path: &Path) -> anyhow::Result<CachedRun> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("Corrupt cache record {}", path.display()))
    }
}

impl ResultStore for FsStore {
    async fn get_run(&self, key: &str) -> anyhow::Result<Option<CachedRun>> {
        let path = self.record_path(key)?;
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }

        match Self::read_record(&path).await {
            Ok(run) => Ok(Some(run)),
            Err(e) => {
                // a corrupt record is treated as a miss and overwritten by the next put
                tracing::warn!(error = ?e, path = ?path, "Discarding unreadable cache record");
                Ok(None)
            }
        }
    }

    async fn put_run(&self, run: &CachedRun) -> anyhow::Result<()> {
        let path = self.record_path(&run.key)?;

        if tokio::fs::try_exists(&path).await? {
            if let Ok(existing) = Self::read_record(&path).await {
                if existing.run_id > run.run_id {
                    tracing::debug!(key = %run.key, run_id = run.run_id, "Ignoring superseded run");
                    return Ok(());
                }
            }
        }

        let body = serde_json::to_vec_pretty(run)?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, body)
            .await
            .inspect_err(|e| tracing::error!(error = ?e, path = ?tmp_path, "Failed to write cache record"))
            .context("Failed to write cache record")?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .context("Failed to move cache record into place")?;

        Ok(())
    }

    async fn remove_stale(&self, current_fingerprint: &str) -> anyhow::Result<StaleRemoval> {
        let mut removal = StaleRemoval::default();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let stale = match Self::read_record(&path).await {
                Ok(run) => run.config_fingerprint != current_fingerprint,
                Err(_) => true,
            };

            if stale {
                tokio::fs::remove_file(&path).await?;
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    removal.removed_keys.push(stem.to_string());
                }
            } else {
                removal.retained += 1;
            }
        }

        removal.removed_keys.sort();
        Ok(removal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_survive_a_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::init(dir.path()).await.unwrap();
        let run = CachedRun::new("abc123", "fp", 1, &"hello").unwrap();
        store.put_run(&run).await.unwrap();

        let reopened = FsStore::init(dir.path()).await.unwrap();
        let fetched = reopened.get_run("abc123").await.unwrap().unwrap();
        assert_eq!(fetched.decode::<String>().unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_rejects_keys_that_escape_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::init(dir.path()).await.unwrap();
        assert!(store.get_run("../outside").await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_record_reads_as_miss_and_is_removed_as_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::init(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("broken.json"), b"{not json")
            .await
            .unwrap();
        store
            .put_run(&CachedRun::new("good", "fp", 1, &1).unwrap())
            .await
            .unwrap();

        assert!(store.get_run("broken").await.unwrap().is_none());

        let removal = store.remove_stale("fp").await.unwrap();
        assert_eq!(removal.removed_keys, vec!["broken".to_string()]);
        assert_eq!(removal.retained, 1);
    }
}
