//! Pipeline core for shardflow.
//!
//! The pieces, in the order a record flows through them:
//! - [`checkpoint::CheckpointStore`] - durable per-shard progress
//! - [`pipeline::Pipeline`] - discovery loop, batch scheduler, concurrency
//!   control and per-shard ordering
//! - [`client::Classifier`] / [`client::HttpClassifier`] - the inference
//!   service seam and its HTTP implementation
//! - [`executor::RequestExecutor`] - retry, backoff and outcome mapping
//! - [`sink::ResultSink`] - atomic per-shard output artifacts
//! - [`stats::PipelineStats`] - run counters and the final snapshot

pub mod checkpoint;
pub mod client;
pub mod executor;
pub mod pipeline;
pub mod sink;
pub mod stats;

pub use checkpoint::CheckpointStore;
pub use client::{CallOutcome, Classifier, HttpClassifier, PredictParams};
pub use executor::{BatchResult, RequestExecutor, RetryConfig};
pub use pipeline::Pipeline;
pub use sink::{ResultSink, ShardSink};
pub use stats::{PipelineStats, StatsSnapshot};
