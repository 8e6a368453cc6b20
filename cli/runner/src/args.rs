//! CLI argument definitions for shardflow.

use clap::{Parser, ValueEnum};
use sf_types::{CorruptShardPolicy, PipelineConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Resumable batch classifier for sharded parquet corpora.
///
/// Streams records out of parquet shards, sends them to a text
/// classification service in concurrent batches, and writes one annotated
/// JSONL artifact per shard. Progress is checkpointed per shard; an
/// interrupted run picks up where it left off.
///
/// ## Examples
///
/// Classify a local corpus:
///   shardflow -d ./data -o ./results -s http://classifier:8000
///
/// Fresh run ignoring previous checkpoints:
///   shardflow -d ./data -o ./results -s http://classifier:8000 --no-resume
///
/// Tight batches against a rate-limited service:
///   shardflow -d ./data -o ./results -s http://classifier:8000 \
///     --batch-size 50 --max-concurrent 8
#[derive(Parser, Debug)]
#[command(name = "shardflow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    // === Input / output ===
    /// Directory containing input parquet shards
    #[arg(short = 'd', long, env = "SHARDFLOW_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Directory for output artifacts and checkpoints
    #[arg(short = 'o', long, env = "SHARDFLOW_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Base URL of the classification service
    #[arg(short = 's', long, env = "SHARDFLOW_SERVICE_URL")]
    pub service_url: String,

    /// Column holding the text payload
    #[arg(long, default_value = "content")]
    pub text_column: String,

    /// Column holding the record identifier
    #[arg(long, default_value = "blob_id")]
    pub id_column: String,

    // === Batching and concurrency ===
    /// Records per inference request (must be >= 1)
    #[arg(short = 'b', long, default_value = "200", value_parser = parse_positive_usize)]
    pub batch_size: usize,

    /// Maximum in-flight requests across all shards (must be >= 1)
    #[arg(short = 'c', long, default_value = "50", value_parser = parse_positive_usize)]
    pub max_concurrent: usize,

    /// Shards processed concurrently (must be >= 1)
    #[arg(long, default_value = "4", value_parser = parse_positive_usize)]
    pub shard_parallelism: usize,

    // === Service behavior ===
    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    pub request_timeout: u64,

    /// Attempts per batch before giving up (first try included)
    #[arg(long, default_value = "4", value_parser = parse_positive_u32)]
    pub max_attempts: u32,

    /// Number of labels requested per record
    #[arg(short = 'k', long, default_value = "2")]
    pub top_k: u32,

    /// Minimum score threshold passed to the service
    #[arg(long, default_value = "0.0")]
    pub threshold: f32,

    /// Records larger than this many bytes get a per-record error
    #[arg(long, default_value = "1048576")]
    pub max_payload_bytes: usize,

    /// Truncate oversized payloads instead of rejecting them
    #[arg(long)]
    pub truncate_oversized: bool,

    // === Resume and stability ===
    /// Ignore existing checkpoints and reprocess everything
    #[arg(long)]
    pub no_resume: bool,

    /// Seconds between stability samples of a candidate shard
    #[arg(long, default_value = "30")]
    pub stability_interval: u64,

    /// Observation rounds before an unstable shard is reported stalled
    #[arg(long, default_value = "5", value_parser = parse_positive_u32)]
    pub stability_rounds: u32,

    /// What to do with a shard that cannot be decoded
    #[arg(long, value_enum, default_value = "skip")]
    pub on_corrupt_shard: CorruptPolicyArg,

    // === Reporting ===
    /// Log level
    #[arg(short = 'l', long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Print the final run summary as JSON on stdout
    #[arg(long)]
    pub stats_json: bool,
}

impl Cli {
    /// Assemble the pipeline configuration from the parsed arguments.
    pub fn to_config(&self) -> PipelineConfig {
        let mut config =
            PipelineConfig::new(&self.data_dir, &self.output_dir, &self.service_url)
                .with_batch_size(self.batch_size)
                .with_max_concurrent(self.max_concurrent)
                .with_request_timeout(Duration::from_secs(self.request_timeout))
                .with_max_attempts(self.max_attempts)
                .with_stability(
                    Duration::from_secs(self.stability_interval),
                    self.stability_rounds,
                )
                .with_corrupt_shard_policy(self.on_corrupt_shard.into());
        config.resume = !self.no_resume;
        config.top_k = self.top_k;
        config.score_threshold = self.threshold;
        config.shard_parallelism = self.shard_parallelism;
        config.max_payload_bytes = self.max_payload_bytes;
        config.truncate_oversized = self.truncate_oversized;
        config.text_column = self.text_column.clone();
        config.id_column = self.id_column.clone();
        config
    }
}

/// Corrupt-shard policy as a CLI value.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CorruptPolicyArg {
    /// Log the shard and continue the run
    Skip,
    /// Abort the run with a non-zero status
    Abort,
}

impl From<CorruptPolicyArg> for CorruptShardPolicy {
    fn from(arg: CorruptPolicyArg) -> Self {
        match arg {
            CorruptPolicyArg::Skip => CorruptShardPolicy::Skip,
            CorruptPolicyArg::Abort => CorruptShardPolicy::Abort,
        }
    }
}

/// Log verbosity.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

fn parse_positive_usize(s: &str) -> Result<usize, String> {
    let value: usize = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if value == 0 {
        return Err("value must be >= 1".to_string());
    }
    Ok(value)
}

fn parse_positive_u32(s: &str) -> Result<u32, String> {
    let value: u32 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if value == 0 {
        return Err("value must be >= 1".to_string());
    }
    Ok(value)
}
