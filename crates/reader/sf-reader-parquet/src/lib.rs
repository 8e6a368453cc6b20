//! Parquet record reader for shardflow.
//!
//! Streams rows from a shard into normalized [`sf_types::Record`]s, starting
//! at a positional resume offset and preserving the shard's natural row
//! order. Resume correctness depends on that order: the checkpoint offset is
//! an index into the file, not a content hash.

mod reader;

pub use reader::{ReaderConfig, RecordIter, ShardReader};
