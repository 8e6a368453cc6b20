//! Durable checkpoint store: file-per-shard JSON with atomic replace.

use parking_lot::Mutex;
use sf_error::{CheckpointError, Result, SfError};
use sf_types::{Fingerprint, ShardCheckpoint};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Durable, crash-consistent record of per-shard progress.
///
/// One JSON file per shard under the checkpoint directory. Every mutation is
/// durable before the call returns: serialize to `<shard>.json.tmp`, fsync,
/// then atomically rename over `<shard>.json`. A crash between two `advance`
/// calls therefore never leaves a checkpoint pointing past data that was not
/// sink-committed.
///
/// Monotonicity is enforced here, not trusted from callers: an `advance`
/// carrying the stored fingerprint and an offset `<=` the stored offset is
/// ignored. An `advance` carrying a *different* fingerprint resets the
/// record - that is the stale-checkpoint invalidation path after a shard
/// was rewritten upstream.
///
/// Writes are serialized per shard (one writer lock per shard identity);
/// unrelated shards commit fully in parallel. Reads go to the in-memory map
/// and are safe from any task.
pub struct CheckpointStore {
    dir: PathBuf,
    shards: Mutex<HashMap<String, ShardCheckpoint>>,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CheckpointStore {
    /// Open the store, scanning any existing checkpoint records.
    ///
    /// A record that fails to parse is logged and ignored: the shard is
    /// simply reprocessed, which is always safe.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| CheckpointError::Write {
                shard_id: "<store>".to_string(),
                source,
            })?;

        let mut shards = HashMap::new();
        let mut entries =
            tokio::fs::read_dir(&dir)
                .await
                .map_err(|source| CheckpointError::Write {
                    shard_id: "<store>".to_string(),
                    source,
                })?;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Error scanning checkpoint directory");
                    break;
                }
            };
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match Self::load_record(&path).await {
                    Ok(cp) => {
                        shards.insert(cp.shard_id.clone(), cp);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Ignoring corrupt checkpoint record");
                    }
                }
            }
        }

        info!(dir = %dir.display(), records = shards.len(), "Checkpoint store opened");

        Ok(Self {
            dir,
            shards: Mutex::new(shards),
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    async fn load_record(path: &Path) -> anyhow::Result<ShardCheckpoint> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Look up the checkpoint for a shard.
    pub fn get(&self, shard_id: &str) -> Option<ShardCheckpoint> {
        self.shards.lock().get(shard_id).cloned()
    }

    /// Snapshot of all records, for the enumerator.
    pub fn snapshot(&self) -> HashMap<String, ShardCheckpoint> {
        self.shards.lock().clone()
    }

    /// Advance a shard's committed offset after a sink commit.
    ///
    /// Returns the checkpoint as stored. Same-fingerprint regressions are
    /// ignored; a new fingerprint resets the record.
    pub async fn advance(
        &self,
        shard_id: &str,
        fingerprint: &Fingerprint,
        new_offset: u64,
        committed_bytes: u64,
    ) -> Result<ShardCheckpoint> {
        let lock = self.writer_lock(shard_id);
        let _guard = lock.lock().await;

        let updated = {
            let mut shards = self.shards.lock();
            let cp = shards
                .entry(shard_id.to_string())
                .or_insert_with(|| ShardCheckpoint::new(shard_id, *fingerprint));

            if cp.matches(fingerprint) {
                if new_offset <= cp.committed_offset && cp.committed_offset > 0 {
                    debug!(
                        shard = shard_id,
                        stored = cp.committed_offset,
                        attempted = new_offset,
                        "Ignoring non-monotonic advance"
                    );
                    return Ok(cp.clone());
                }
            } else {
                // The shard was rewritten since this record was taken.
                *cp = ShardCheckpoint::new(shard_id, *fingerprint);
            }

            cp.committed_offset = new_offset;
            cp.committed_bytes = committed_bytes;
            cp.updated_at = chrono::Utc::now();
            cp.clone()
        };

        self.persist(&updated).await?;
        Ok(updated)
    }

    /// Mark a shard complete. Durable before return.
    pub async fn mark_complete(&self, shard_id: &str) -> Result<()> {
        let lock = self.writer_lock(shard_id);
        let _guard = lock.lock().await;

        let updated = {
            let mut shards = self.shards.lock();
            match shards.get_mut(shard_id) {
                Some(cp) => {
                    cp.complete = true;
                    cp.updated_at = chrono::Utc::now();
                    cp.clone()
                }
                None => {
                    return Err(SfError::Checkpoint(CheckpointError::Serialize {
                        shard_id: shard_id.to_string(),
                        message: "cannot complete a shard with no checkpoint".to_string(),
                    }))
                }
            }
        };

        self.persist(&updated).await
    }

    fn writer_lock(&self, shard_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.write_locks
            .lock()
            .entry(shard_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Write-then-fsync-then-rename. Called under the shard's writer lock.
    async fn persist(&self, cp: &ShardCheckpoint) -> Result<()> {
        let final_path = self.record_path(&cp.shard_id);
        let tmp_path = final_path.with_extension("json.tmp");

        let bytes = serde_json::to_vec_pretty(cp).map_err(|e| CheckpointError::Serialize {
            shard_id: cp.shard_id.clone(),
            message: e.to_string(),
        })?;

        let write = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp_path, &final_path).await?;
            Ok::<_, std::io::Error>(())
        };

        write.await.map_err(|source| {
            SfError::Checkpoint(CheckpointError::Write {
                shard_id: cp.shard_id.clone(),
                source,
            })
        })
    }

    fn record_path(&self, shard_id: &str) -> PathBuf {
        self.dir.join(format!("{shard_id}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fp(size: u64) -> Fingerprint {
        Fingerprint {
            size_bytes: size,
            mtime_unix_ms: 1000,
        }
    }

    #[tokio::test]
    async fn test_advance_and_get() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(dir.path()).await.unwrap();

        store.advance("shard-a", &fp(100), 3, 120).await.unwrap();
        let cp = store.get("shard-a").unwrap();
        assert_eq!(cp.committed_offset, 3);
        assert_eq!(cp.committed_bytes, 120);
        assert!(!cp.complete);
    }

    #[tokio::test]
    async fn test_offset_monotonicity() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(dir.path()).await.unwrap();

        store.advance("shard-a", &fp(100), 6, 200).await.unwrap();
        // Regression: ignored, stored state unchanged.
        store.advance("shard-a", &fp(100), 6, 999).await.unwrap();
        store.advance("shard-a", &fp(100), 3, 999).await.unwrap();

        let cp = store.get("shard-a").unwrap();
        assert_eq!(cp.committed_offset, 6);
        assert_eq!(cp.committed_bytes, 200);
    }

    #[tokio::test]
    async fn test_fingerprint_change_resets() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(dir.path()).await.unwrap();

        store.advance("shard-a", &fp(100), 9, 500).await.unwrap();
        // The shard was rewritten: a lower offset under a new fingerprint
        // must be accepted.
        store.advance("shard-a", &fp(200), 3, 90).await.unwrap();

        let cp = store.get("shard-a").unwrap();
        assert_eq!(cp.committed_offset, 3);
        assert_eq!(cp.committed_bytes, 90);
        assert!(cp.matches(&fp(200)));
    }

    #[tokio::test]
    async fn test_mark_complete() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(dir.path()).await.unwrap();

        store.advance("shard-a", &fp(100), 10, 400).await.unwrap();
        store.mark_complete("shard-a").await.unwrap();
        assert!(store.get("shard-a").unwrap().complete);
    }

    #[tokio::test]
    async fn test_complete_without_checkpoint_fails() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(dir.path()).await.unwrap();
        assert!(store.mark_complete("never-seen").await.is_err());
    }

    #[tokio::test]
    async fn test_durable_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = CheckpointStore::open(dir.path()).await.unwrap();
            store.advance("shard-a", &fp(100), 7, 333).await.unwrap();
            store.mark_complete("shard-a").await.unwrap();
            store.advance("shard-b", &fp(50), 2, 80).await.unwrap();
        }

        let store = CheckpointStore::open(dir.path()).await.unwrap();
        let a = store.get("shard-a").unwrap();
        assert_eq!(a.committed_offset, 7);
        assert!(a.complete);
        let b = store.get("shard-b").unwrap();
        assert_eq!(b.committed_offset, 2);
        assert!(!b.complete);
    }

    #[tokio::test]
    async fn test_corrupt_record_ignored_on_open() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();

        let store = CheckpointStore::open(dir.path()).await.unwrap();
        assert!(store.get("broken").is_none());
    }
}
