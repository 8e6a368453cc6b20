//! Pipeline configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// What to do when a shard cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptShardPolicy {
    /// Log the shard, leave its checkpoint untouched, continue the run.
    Skip,
    /// Abort the run with a non-zero status.
    Abort,
}

/// Validated configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory containing input parquet shards.
    pub data_dir: PathBuf,

    /// Directory for output artifacts and checkpoints.
    pub output_dir: PathBuf,

    /// Base URL of the classification service.
    pub service_url: String,

    /// Records per inference request.
    pub batch_size: usize,

    /// Maximum simultaneously in-flight batches across all shards.
    pub max_concurrent: usize,

    /// Per-request timeout.
    pub request_timeout: Duration,

    /// Skip shards whose checkpoint reports completion.
    pub resume: bool,

    /// Maximum attempts per batch (first try + retries).
    pub max_attempts: u32,

    /// Number of labels requested per record (`k` query parameter).
    pub top_k: u32,

    /// Minimum score threshold (`threshold` query parameter).
    pub score_threshold: f32,

    /// Wait between the two stability samples of a candidate shard.
    pub stability_interval: Duration,

    /// Observation rounds before an unstable shard is reported stalled.
    pub stability_rounds: u32,

    /// Shards processed concurrently. The batch concurrency bound is global,
    /// so this only affects read-side parallelism.
    pub shard_parallelism: usize,

    /// Records with a text payload longer than this are rejected with a
    /// per-record error instead of being sent.
    pub max_payload_bytes: usize,

    /// Truncate oversized payloads at a char boundary instead of rejecting.
    pub truncate_oversized: bool,

    /// Policy for undecodable shards.
    pub on_corrupt_shard: CorruptShardPolicy,

    /// Column holding the text payload.
    pub text_column: String,

    /// Column holding the record identifier.
    pub id_column: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            service_url: String::new(),
            batch_size: 200,
            max_concurrent: 50,
            request_timeout: Duration::from_secs(30),
            resume: true,
            max_attempts: 4,
            top_k: 2,
            score_threshold: 0.0,
            stability_interval: Duration::from_secs(30),
            stability_rounds: 5,
            shard_parallelism: 4,
            max_payload_bytes: 1024 * 1024,
            truncate_oversized: false,
            on_corrupt_shard: CorruptShardPolicy::Skip,
            text_column: "content".to_string(),
            id_column: "blob_id".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Start from defaults.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        service_url: impl Into<String>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            output_dir: output_dir.into(),
            service_url: service_url.into(),
            ..Default::default()
        }
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the global concurrency bound.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the per-batch attempt bound.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the stability observation window.
    pub fn with_stability(mut self, interval: Duration, rounds: u32) -> Self {
        self.stability_interval = interval;
        self.stability_rounds = rounds;
        self
    }

    /// Set the corrupt-shard policy.
    pub fn with_corrupt_shard_policy(mut self, policy: CorruptShardPolicy) -> Self {
        self.on_corrupt_shard = policy;
        self
    }

    /// Check invariants the rest of the pipeline relies on.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be >= 1".to_string());
        }
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be >= 1".to_string());
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be >= 1".to_string());
        }
        if self.shard_parallelism == 0 {
            return Err("shard_parallelism must be >= 1".to_string());
        }
        if self.service_url.is_empty() {
            return Err("service_url must not be empty".to_string());
        }
        if self.request_timeout.is_zero() {
            return Err("timeout must be > 0".to_string());
        }
        Ok(())
    }
}
