//! Core data types for the shardflow pipeline.
//!
//! This crate defines the vocabulary shared by every pipeline stage:
//! - [`Record`] - one input unit read from a shard
//! - [`Shard`] / [`Fingerprint`] - an input file as a resumable unit of work
//! - [`Batch`] - a bounded group of records sent as one inference request
//! - [`ShardCheckpoint`] - durable progress marker per shard
//! - [`Classification`] / [`RecordOutcome`] - per-record results
//! - [`PipelineConfig`] - validated run configuration

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod outcome;
pub mod record;
pub mod shard;

pub use batch::Batch;
pub use checkpoint::ShardCheckpoint;
pub use config::{CorruptShardPolicy, PipelineConfig};
pub use outcome::{Classification, RecordOutcome};
pub use record::Record;
pub use shard::{Fingerprint, Shard};
