//! Run counters and the end-of-run summary.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Lock-free counters shared across all shard tasks.
///
/// Counters only ever increase during a run; the snapshot at the end is the
/// run report printed by the CLI.
pub struct PipelineStats {
    started: Instant,
    records_classified: AtomicU64,
    records_failed: AtomicU64,
    batches_committed: AtomicU64,
    batches_failed: AtomicU64,
    shards_completed: AtomicU64,
    shards_skipped: AtomicU64,
    shards_stalled: AtomicU64,
    shards_corrupt: AtomicU64,
    predict_attempts: AtomicU64,
    retries: AtomicU64,
    bytes_written: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            records_classified: AtomicU64::new(0),
            records_failed: AtomicU64::new(0),
            batches_committed: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            shards_completed: AtomicU64::new(0),
            shards_skipped: AtomicU64::new(0),
            shards_stalled: AtomicU64::new(0),
            shards_corrupt: AtomicU64::new(0),
            predict_attempts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    pub fn record_classified(&self, n: u64) {
        self.records_classified.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_failed(&self, n: u64) {
        self.records_failed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_batch_committed(&self) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shard_completed(&self) {
        self.shards_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shard_skipped(&self) {
        self.shards_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shard_stalled(&self) {
        self.shards_stalled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shard_corrupt(&self) {
        self.shards_corrupt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.predict_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_written(&self, n: u64) {
        self.bytes_written.fetch_add(n, Ordering::Relaxed);
    }

    /// Consistent-enough view for reporting; counters may still move while
    /// the snapshot is taken.
    pub fn snapshot(&self) -> StatsSnapshot {
        let records_classified = self.records_classified.load(Ordering::Relaxed);
        let records_failed = self.records_failed.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed();
        let total = records_classified + records_failed;
        let records_per_sec = if elapsed.as_secs_f64() > 0.0 {
            total as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        StatsSnapshot {
            records_classified,
            records_failed,
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            shards_completed: self.shards_completed.load(Ordering::Relaxed),
            shards_skipped: self.shards_skipped.load(Ordering::Relaxed),
            shards_stalled: self.shards_stalled.load(Ordering::Relaxed),
            shards_corrupt: self.shards_corrupt.load(Ordering::Relaxed),
            predict_attempts: self.predict_attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            elapsed_secs: elapsed.as_secs_f64(),
            records_per_sec,
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the run counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub records_classified: u64,
    pub records_failed: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub shards_completed: u64,
    pub shards_skipped: u64,
    pub shards_stalled: u64,
    pub shards_corrupt: u64,
    pub predict_attempts: u64,
    pub retries: u64,
    pub bytes_written: u64,
    pub elapsed_secs: f64,
    pub records_per_sec: f64,
}

impl StatsSnapshot {
    /// True when any shard failed to finish or any record errored.
    pub fn has_failures(&self) -> bool {
        self.records_failed > 0
            || self.batches_failed > 0
            || self.shards_stalled > 0
            || self.shards_corrupt > 0
    }
}
