//! Result sink: atomic per-shard output artifacts.
//!
//! Each shard accumulates rows in a staging file (`<shard>.jsonl.partial`)
//! and is renamed to its final name (`<shard>.jsonl`) only once every record
//! of the shard has an outcome. Readers of the output directory therefore
//! never observe a half-written artifact under the final name.
//!
//! Appends are batch-atomic with respect to the checkpoint: each commit
//! fsyncs and reports the resulting byte length, the caller records that
//! length in the checkpoint, and on resume the staging file is truncated
//! back to the last checkpointed length. A crash mid-append leaves a torn
//! tail that the next run discards before re-emitting the batch.

use sf_error::{Result, SfError, SinkError};
use sf_types::{Batch, RecordOutcome};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

/// Factory for per-shard sinks under one output directory.
pub struct ResultSink {
    dir: PathBuf,
}

impl ResultSink {
    /// Create a sink rooted at the output directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Open the staging artifact for a shard, discarding any bytes past the
    /// last checkpointed commit.
    pub async fn open_shard(&self, shard_id: &str, committed_bytes: u64) -> Result<ShardSink> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| SinkError::Write {
                shard_id: shard_id.to_string(),
                source,
            })?;

        let final_path = self.dir.join(format!("{shard_id}.jsonl"));
        let staging_path = self.dir.join(format!("{shard_id}.jsonl.partial"));

        let io_err = |source| {
            SfError::Sink(SinkError::Write {
                shard_id: shard_id.to_string(),
                source,
            })
        };

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&staging_path)
            .await
            .map_err(io_err)?;

        let existing = file.metadata().await.map_err(io_err)?.len();
        if existing != committed_bytes {
            debug!(
                shard = shard_id,
                staged = existing,
                committed = committed_bytes,
                "Truncating staging artifact to last committed length"
            );
            file.set_len(committed_bytes).await.map_err(io_err)?;
        }
        file.seek(std::io::SeekFrom::Start(committed_bytes))
            .await
            .map_err(io_err)?;

        Ok(ShardSink {
            shard_id: shard_id.to_string(),
            staging_path,
            final_path,
            file,
            bytes: committed_bytes,
        })
    }

    /// Path a finalized artifact would have, for reporting.
    pub fn artifact_path(&self, shard_id: &str) -> PathBuf {
        self.dir.join(format!("{shard_id}.jsonl"))
    }

    /// True when a shard's artifact was already promoted: the final file
    /// sits at exactly the committed length and no staging file remains.
    /// Distinguishes a crash after `finalize` from one before it.
    pub fn is_finalized(&self, shard_id: &str, committed_bytes: u64) -> bool {
        if self.dir.join(format!("{shard_id}.jsonl.partial")).exists() {
            return false;
        }
        std::fs::metadata(self.artifact_path(shard_id))
            .map(|m| m.len() == committed_bytes)
            .unwrap_or(false)
    }
}

/// Open staging artifact for one shard.
pub struct ShardSink {
    shard_id: String,
    staging_path: PathBuf,
    final_path: PathBuf,
    file: File,
    bytes: u64,
}

impl ShardSink {
    /// Append one batch's rows and make them durable.
    ///
    /// Returns the total byte length of the artifact after the append; the
    /// caller checkpoints this alongside the batch's end offset.
    pub async fn commit(&mut self, batch: &Batch, outcomes: &[RecordOutcome]) -> Result<u64> {
        let mut buf = Vec::with_capacity(outcomes.len() * 256);
        for (record, outcome) in batch.records.iter().zip(outcomes) {
            let row = build_row(record, outcome);
            serde_json::to_writer(&mut buf, &row).map_err(|e| SinkError::Serialize {
                message: e.to_string(),
            })?;
            buf.push(b'\n');
        }

        let write = async {
            self.file.write_all(&buf).await?;
            self.file.sync_all().await?;
            Ok::<_, std::io::Error>(())
        };
        write.await.map_err(|source| SinkError::Write {
            shard_id: self.shard_id.clone(),
            source,
        })?;

        self.bytes += buf.len() as u64;
        Ok(self.bytes)
    }

    /// Byte length of the artifact as of the last commit.
    pub fn committed_bytes(&self) -> u64 {
        self.bytes
    }

    /// Promote the staging artifact to its final name.
    pub async fn finalize(mut self) -> Result<PathBuf> {
        let finish = async {
            self.file.sync_all().await?;
            tokio::fs::rename(&self.staging_path, &self.final_path).await?;
            Ok::<_, std::io::Error>(())
        };
        finish.await.map_err(|source| {
            SfError::Sink(SinkError::Finalize {
                shard_id: self.shard_id.clone(),
                source,
            })
        })?;

        info!(
            shard = %self.shard_id,
            path = %self.final_path.display(),
            bytes = self.bytes,
            "Finalized output artifact"
        );
        Ok(self.final_path)
    }

    /// Remove the staging artifact. Used when a shard is abandoned with no
    /// durable progress worth keeping.
    pub async fn discard(self) -> Result<()> {
        tokio::fs::remove_file(&self.staging_path)
            .await
            .map_err(|source| {
                SfError::Sink(SinkError::Write {
                    shard_id: self.shard_id.clone(),
                    source,
                })
            })
    }
}

/// One output row: the record's passthrough fields plus the classification
/// (or error) fields, mirroring the input schema with annotations added.
fn build_row(record: &sf_types::Record, outcome: &RecordOutcome) -> serde_json::Value {
    let mut row = record.passthrough.clone();
    row.insert("id".to_string(), serde_json::Value::String(record.id.clone()));
    row.insert(
        "content_length".to_string(),
        serde_json::Value::from(record.payload_len() as u64),
    );
    row.insert(
        "processed_at".to_string(),
        serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
    );

    match outcome {
        RecordOutcome::Classified(c) => {
            row.insert("labels".to_string(), serde_json::json!(c.labels));
            row.insert("scores".to_string(), serde_json::json!(c.scores));
            row.insert(
                "prediction".to_string(),
                serde_json::json!(c.prediction()),
            );
            row.insert(
                "confidence".to_string(),
                serde_json::json!(c.confidence()),
            );
        }
        RecordOutcome::Failed {
            error_type,
            message,
        } => {
            row.insert("error_type".to_string(), serde_json::json!(error_type));
            row.insert("error".to_string(), serde_json::json!(message));
        }
    }

    serde_json::Value::Object(row)
}

/// Count the rows of a finalized artifact. Test and report helper.
pub async fn count_rows(path: &Path) -> std::io::Result<usize> {
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(contents.lines().filter(|l| !l.trim().is_empty()).count())
}
