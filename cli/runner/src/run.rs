//! Run assembly: logging, pre-flight, pipeline wiring, signal handling.

use crate::args::{Cli, LogLevel};
use anyhow::Context;
use sf_worker::{CheckpointStore, Classifier, HttpClassifier, Pipeline, StatsSnapshot};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Initialize logging to stderr so stdout stays clean for program output.
///
/// `RUST_LOG` overrides the flag when set.
pub fn init_logging(level: LogLevel) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// Build and run the pipeline for one pass.
pub async fn execute(args: Cli) -> anyhow::Result<StatsSnapshot> {
    let config = args.to_config();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let classifier = Arc::new(
        HttpClassifier::new(&config.service_url, config.request_timeout)
            .context("failed to build service client")?,
    );

    // Fail fast when the service is down rather than burning the retry
    // budget of the first batches.
    classifier
        .health()
        .await
        .with_context(|| format!("pre-flight check against {} failed", config.service_url))?;
    info!(service = %config.service_url, "Service healthy");

    let store = Arc::new(
        CheckpointStore::open(config.output_dir.join("checkpoints"))
            .await
            .context("failed to open checkpoint store")?,
    );

    let pipeline = Pipeline::new(config, classifier, store.clone())?;

    // First Ctrl-C winds down at batch boundaries; progress stays resumable.
    let shutdown = pipeline.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight batches");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    let snapshot = pipeline.run().await?;

    if snapshot.has_failures() {
        report_last_good_offsets(&store);
    }

    Ok(snapshot)
}

/// On a degraded run, log where each incomplete shard will resume.
fn report_last_good_offsets(store: &CheckpointStore) {
    for (shard_id, cp) in store.snapshot() {
        if !cp.complete {
            warn!(
                shard = %shard_id,
                committed_offset = cp.committed_offset,
                "Shard incomplete, next run resumes here"
            );
        }
    }
}
