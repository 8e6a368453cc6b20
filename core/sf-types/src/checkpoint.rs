//! Durable progress marker per shard.

use crate::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Checkpoint record for one shard.
///
/// The checkpoint store is the single source of truth for "what has already
/// been durably written". Invariants (enforced by the store, not trusted
/// from callers):
/// - `committed_offset` never decreases for a given fingerprint
/// - `complete` is only set after output covering every record up to the
///   shard's end has been durably committed
/// - a fingerprint change resets the record (stale checkpoint invalidation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardCheckpoint {
    /// Shard identity this record belongs to.
    pub shard_id: String,

    /// Fingerprint of the shard file when this progress was recorded.
    pub fingerprint: Fingerprint,

    /// Exclusive offset of the last record whose batch was sink-committed.
    pub committed_offset: u64,

    /// Byte length of the staged output artifact at `committed_offset`.
    /// The sink truncates its staging file to this length on resume,
    /// discarding any torn tail from a crash mid-append.
    pub committed_bytes: u64,

    /// True once every record of the shard has been committed.
    pub complete: bool,

    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl ShardCheckpoint {
    /// Fresh checkpoint at offset zero for a newly observed shard.
    pub fn new(shard_id: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            shard_id: shard_id.into(),
            fingerprint,
            committed_offset: 0,
            committed_bytes: 0,
            complete: false,
            updated_at: Utc::now(),
        }
    }

    /// True if this checkpoint still describes the file on disk.
    pub fn matches(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprint == *fingerprint
    }
}
