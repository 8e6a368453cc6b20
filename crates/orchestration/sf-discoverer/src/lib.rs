//! Shard discovery for shardflow.
//!
//! Two concerns live here:
//! - [`enumerate`] - checkpoint-aware listing of input shards
//! - [`stability`] - detecting that an upstream producer has finished
//!   writing a shard before we read it

pub mod enumerate;
pub mod stability;

pub use enumerate::{discover, Discovery};
pub use stability::{StabilityDetector, StabilityStatus};
