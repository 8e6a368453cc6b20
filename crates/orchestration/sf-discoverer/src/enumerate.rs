//! Checkpoint-aware shard enumeration.

use sf_error::DiscoveryError;
use sf_types::{Fingerprint, Shard, ShardCheckpoint};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of one discovery pass over the data directory.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Shards eligible for processing, each with its resume offset.
    pub shards: Vec<Shard>,

    /// Shards skipped because their checkpoint reports completion and the
    /// on-disk fingerprint still matches.
    pub skipped_complete: usize,

    /// Shards whose checkpoint was stale (fingerprint mismatch); these are
    /// reprocessed from offset zero.
    pub invalidated: usize,

    /// Empty files, ignored this pass.
    pub skipped_empty: usize,
}

/// List input shards, deciding per shard whether to skip, resume or restart.
///
/// The decision table, per shard with a checkpoint:
/// - complete and fingerprint matches: skip
/// - incomplete and fingerprint matches: resume at the stored offset
/// - fingerprint mismatch: the file changed since the checkpoint was taken;
///   reprocess from offset zero (the store resets the record when the first
///   `advance` arrives carrying the new fingerprint)
///
/// This function never mutates checkpoints. An unreadable directory is
/// fatal; a file that disappears between listing and stat is skipped with a
/// warning (the upstream producer may be rotating files).
pub fn discover(
    data_dir: &Path,
    checkpoints: &HashMap<String, ShardCheckpoint>,
    resume: bool,
) -> Result<Discovery, DiscoveryError> {
    let entries = std::fs::read_dir(data_dir).map_err(|source| {
        DiscoveryError::DirectoryUnreadable {
            path: data_dir.display().to_string(),
            source,
        }
    })?;

    let mut discovery = Discovery::default();
    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|e| e == "parquet").unwrap_or(false))
        .collect();
    // Deterministic FIFO order across runs.
    paths.sort();

    for path in paths {
        let fingerprint = match Fingerprint::of_file(&path) {
            Ok(fp) => fp,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Shard vanished during discovery, skipping");
                continue;
            }
        };

        if fingerprint.size_bytes == 0 {
            discovery.skipped_empty += 1;
            debug!(path = %path.display(), "Skipping empty shard");
            continue;
        }

        let mut shard = Shard::new(&path, fingerprint);

        if resume {
            if let Some(cp) = checkpoints.get(&shard.shard_id) {
                if cp.matches(&fingerprint) {
                    if cp.complete {
                        discovery.skipped_complete += 1;
                        debug!(shard = %shard.shard_id, "Skipping completed shard");
                        continue;
                    }
                    shard = shard.with_resume_offset(cp.committed_offset);
                    debug!(
                        shard = %shard.shard_id,
                        resume_offset = shard.resume_offset,
                        "Resuming shard"
                    );
                } else {
                    discovery.invalidated += 1;
                    warn!(
                        shard = %shard.shard_id,
                        "Shard changed since checkpoint, reprocessing from offset 0"
                    );
                }
            }
        }

        discovery.shards.push(shard);
    }

    info!(
        eligible = discovery.shards.len(),
        skipped_complete = discovery.skipped_complete,
        invalidated = discovery.invalidated,
        "Discovery pass complete"
    );

    Ok(discovery)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn checkpoint_for(path: &Path, offset: u64, complete: bool) -> ShardCheckpoint {
        let fp = Fingerprint::of_file(path).unwrap();
        let shard = Shard::new(path, fp);
        let mut cp = ShardCheckpoint::new(&shard.shard_id, fp);
        cp.committed_offset = offset;
        cp.complete = complete;
        cp
    }

    #[test]
    fn test_lists_parquet_only() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "a.parquet", b"data");
        touch(&dir, "b.parquet", b"data");
        touch(&dir, "notes.txt", b"data");

        let discovery = discover(dir.path(), &HashMap::new(), true).unwrap();
        assert_eq!(discovery.shards.len(), 2);
    }

    #[test]
    fn test_skips_empty_files() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "empty.parquet", b"");
        touch(&dir, "full.parquet", b"data");

        let discovery = discover(dir.path(), &HashMap::new(), true).unwrap();
        assert_eq!(discovery.shards.len(), 1);
        assert_eq!(discovery.skipped_empty, 1);
    }

    #[test]
    fn test_skips_complete_matching_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "a.parquet", b"data");
        let cp = checkpoint_for(&path, 10, true);
        let checkpoints = HashMap::from([(cp.shard_id.clone(), cp)]);

        let discovery = discover(dir.path(), &checkpoints, true).unwrap();
        assert!(discovery.shards.is_empty());
        assert_eq!(discovery.skipped_complete, 1);
    }

    #[test]
    fn test_resumes_incomplete_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "a.parquet", b"data");
        let cp = checkpoint_for(&path, 6, false);
        let checkpoints = HashMap::from([(cp.shard_id.clone(), cp)]);

        let discovery = discover(dir.path(), &checkpoints, true).unwrap();
        assert_eq!(discovery.shards.len(), 1);
        assert_eq!(discovery.shards[0].resume_offset, 6);
    }

    #[test]
    fn test_invalidates_stale_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "a.parquet", b"data");
        let mut cp = checkpoint_for(&path, 10, true);
        // Simulate the file having been rewritten since the checkpoint.
        cp.fingerprint.size_bytes += 999;
        let checkpoints = HashMap::from([(cp.shard_id.clone(), cp)]);

        let discovery = discover(dir.path(), &checkpoints, true).unwrap();
        assert_eq!(discovery.shards.len(), 1);
        assert_eq!(discovery.shards[0].resume_offset, 0);
        assert_eq!(discovery.invalidated, 1);
    }

    #[test]
    fn test_resume_disabled_ignores_checkpoints() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "a.parquet", b"data");
        let cp = checkpoint_for(&path, 10, true);
        let checkpoints = HashMap::from([(cp.shard_id.clone(), cp)]);

        let discovery = discover(dir.path(), &checkpoints, false).unwrap();
        assert_eq!(discovery.shards.len(), 1);
        assert_eq!(discovery.shards[0].resume_offset, 0);
    }

    #[test]
    fn test_unreadable_directory_is_fatal() {
        let result = discover(Path::new("/no/such/dir"), &HashMap::new(), true);
        assert!(matches!(
            result,
            Err(DiscoveryError::DirectoryUnreadable { .. })
        ));
    }
}
