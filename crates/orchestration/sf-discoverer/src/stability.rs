//! Stability detection for shards still being written upstream.

use sf_types::Fingerprint;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Outcome of observing a candidate shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityStatus {
    /// Two samples across the observation window were identical; the
    /// fingerprint is the one the pipeline should record.
    Stable(Fingerprint),

    /// The file kept changing for the whole observation budget. Non-fatal:
    /// the shard is reported and skipped for this run.
    Stalled,
}

/// Detects whether an upstream producer has finished writing a shard.
///
/// A shard is considered stable when its size/mtime fingerprint is unchanged
/// across a wait interval. Each changed sample consumes one observation
/// round; a shard that keeps changing past the round budget is stalled.
#[derive(Debug, Clone)]
pub struct StabilityDetector {
    interval: Duration,
    max_rounds: u32,
}

impl StabilityDetector {
    /// Create a detector with the given observation window and round budget.
    pub fn new(interval: Duration, max_rounds: u32) -> Self {
        Self {
            interval,
            max_rounds: max_rounds.max(1),
        }
    }

    /// Observe a shard until it is stable or the round budget is exhausted.
    ///
    /// A file that vanishes mid-observation is treated as stalled; the
    /// producer may still be rotating it into place.
    pub async fn wait_until_stable(&self, path: &Path) -> StabilityStatus {
        let mut previous = match Fingerprint::of_file(path) {
            Ok(fp) => fp,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot sample shard, treating as stalled");
                return StabilityStatus::Stalled;
            }
        };

        for round in 0..self.max_rounds {
            sleep(self.interval).await;

            let current = match Fingerprint::of_file(path) {
                Ok(fp) => fp,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Shard vanished during observation");
                    return StabilityStatus::Stalled;
                }
            };

            if current == previous {
                debug!(path = %path.display(), round, "Shard stable");
                return StabilityStatus::Stable(current);
            }

            debug!(
                path = %path.display(),
                round,
                size = current.size_bytes,
                "Shard still changing"
            );
            previous = current;
        }

        warn!(
            path = %path.display(),
            rounds = self.max_rounds,
            "Shard never stabilized, reporting as stalled"
        );
        StabilityStatus::Stalled
    }
}
