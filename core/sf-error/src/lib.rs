//! Error types and retry classification for shardflow.
//!
//! This crate provides:
//! - [`SfError`] - Top-level error enum for all pipeline errors
//! - Domain-specific errors ([`DiscoveryError`], [`ReaderError`],
//!   [`CheckpointError`], [`SinkError`], [`ClientError`])
//! - [`classify_status`] - HTTP status classification for retry decisions
//!
//! Infrastructure failures (discovery, checkpoint writes, sink writes) are
//! fatal and propagate up through [`SfError`]; per-batch and per-record
//! failures are modeled as data (see `CallOutcome` / `RecordOutcome` in the
//! worker crate) so the scheduler's decision logic stays exhaustive and
//! testable without a network.

use thiserror::Error;

/// Top-level error type for shardflow.
#[derive(Error, Debug)]
pub enum SfError {
    /// Work enumeration failed. Fatal: the run cannot even list its input.
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Shard decode errors. Policy-dependent: skip the shard or abort.
    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    /// Checkpoint durability errors. Fatal: progress can no longer be
    /// recorded safely, continuing would risk duplication on resume.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Output durability errors. Fatal for the same reason.
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Classification service client errors that escape the retry loop
    /// (e.g. the pre-flight health check).
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors (wrapped anyhow).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors while enumerating input shards.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Input directory cannot be listed.
    #[error("Cannot read data directory {path}: {source}")]
    DirectoryUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// File metadata could not be read during fingerprinting.
    #[error("Cannot stat {path}: {source}")]
    Stat {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors while decoding a shard into records.
#[derive(Error, Debug)]
pub enum ReaderError {
    /// The file has an unreadable or malformed structure.
    #[error("Corrupt shard {shard_id}: {message}")]
    CorruptShard { shard_id: String, message: String },

    /// A required column is absent.
    #[error("Shard {shard_id} is missing required column '{column}'")]
    MissingColumn { shard_id: String, column: String },

    /// I/O failure while reading the file.
    #[error("I/O error reading {shard_id}: {source}")]
    Io {
        shard_id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the durable checkpoint store.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Durable write failed.
    #[error("Checkpoint write for {shard_id} failed: {source}")]
    Write {
        shard_id: String,
        #[source]
        source: std::io::Error,
    },

    /// Checkpoint record failed to serialize.
    #[error("Checkpoint serialization for {shard_id} failed: {message}")]
    Serialize { shard_id: String, message: String },
}

/// Errors from the result sink.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Durable append to the staging artifact failed.
    #[error("Sink write for {shard_id} failed: {source}")]
    Write {
        shard_id: String,
        #[source]
        source: std::io::Error,
    },

    /// Final rename of the completed artifact failed.
    #[error("Sink finalize for {shard_id} failed: {source}")]
    Finalize {
        shard_id: String,
        #[source]
        source: std::io::Error,
    },

    /// An output row failed to serialize.
    #[error("Output row serialization failed: {message}")]
    Serialize { message: String },
}

/// Errors from the classification service client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Build(String),

    /// The service is not healthy at pre-flight.
    #[error("Service health check failed: {0}")]
    Unhealthy(String),
}

/// Retry classification of an HTTP response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 5xx: server-side trouble, retried with backoff.
    Retryable,
    /// 4xx: the request itself is invalid, retrying cannot succeed.
    Rejected,
}

/// Classify an HTTP status code for retry purposes.
///
/// 4xx means the batch payload itself was refused (malformed, text too
/// long) and is never retried; everything else that is not a success is
/// treated as transient.
pub fn classify_status(status: u16) -> StatusClass {
    if (400..500).contains(&status) {
        StatusClass::Rejected
    } else {
        StatusClass::Retryable
    }
}

/// Result type alias using SfError.
pub type Result<T> = std::result::Result<T, SfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_client_errors_rejected() {
        assert_eq!(classify_status(400), StatusClass::Rejected);
        assert_eq!(classify_status(404), StatusClass::Rejected);
        assert_eq!(classify_status(422), StatusClass::Rejected);
    }

    #[test]
    fn test_classify_server_errors_retryable() {
        assert_eq!(classify_status(500), StatusClass::Retryable);
        assert_eq!(classify_status(502), StatusClass::Retryable);
        assert_eq!(classify_status(503), StatusClass::Retryable);
    }

    #[test]
    fn test_error_display() {
        let err = SfError::Reader(ReaderError::MissingColumn {
            shard_id: "shard-a".to_string(),
            column: "content".to_string(),
        });
        assert!(err.to_string().contains("missing required column"));
    }

    #[test]
    fn test_from_conversions() {
        fn fatal() -> Result<()> {
            Err(CheckpointError::Serialize {
                shard_id: "s".to_string(),
                message: "bad".to_string(),
            })?;
            Ok(())
        }
        assert!(matches!(fatal(), Err(SfError::Checkpoint(_))));
    }
}
