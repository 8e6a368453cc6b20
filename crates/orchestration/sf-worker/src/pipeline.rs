//! Run orchestration: discovery, stability gating, per-shard scheduling.
//!
//! One `run` is a single pass: enumerate shards against the checkpoint
//! store, gate each candidate behind the stability detector, then stream
//! its records through batch → classify → sink commit → checkpoint advance.
//!
//! Concurrency shape: shards are processed `shard_parallelism` at a time;
//! within and across shards, in-flight predict calls are bounded by one
//! global semaphore (`max_concurrent`). Tokio's semaphore is FIFO-fair, so
//! a slow shard cannot starve the others. Within a shard, calls may
//! complete out of order but commits are drained in submission order, so a
//! shard's checkpoint only ever covers a contiguous prefix.

use crate::checkpoint::CheckpointStore;
use crate::client::{Classifier, PredictParams};
use crate::executor::{BatchResult, RequestExecutor, RetryConfig};
use crate::sink::{ResultSink, ShardSink};
use crate::stats::{PipelineStats, StatsSnapshot};
use futures::stream::{FuturesOrdered, StreamExt};
use sf_discoverer::{discover, StabilityDetector, StabilityStatus};
use sf_error::{ReaderError, Result, SfError};
use sf_reader_parquet::{ReaderConfig, ShardReader};
use sf_types::{Batch, CorruptShardPolicy, Fingerprint, PipelineConfig, Record, Shard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// The batch pipeline: one instance per run.
pub struct Pipeline<C: Classifier + 'static> {
    config: PipelineConfig,
    store: Arc<CheckpointStore>,
    sink: ResultSink,
    executor: Arc<RequestExecutor<C>>,
    reader: ShardReader,
    detector: StabilityDetector,
    semaphore: Arc<Semaphore>,
    stats: Arc<PipelineStats>,
    shutdown: Arc<AtomicBool>,
}

impl<C: Classifier + 'static> Pipeline<C> {
    /// Assemble a pipeline from a validated configuration.
    pub fn new(
        config: PipelineConfig,
        classifier: Arc<C>,
        store: Arc<CheckpointStore>,
    ) -> Result<Self> {
        config.validate().map_err(SfError::Config)?;

        let stats = Arc::new(PipelineStats::new());
        let executor = Arc::new(RequestExecutor::new(
            classifier,
            RetryConfig::default().with_max_attempts(config.max_attempts),
            PredictParams {
                top_k: config.top_k,
                threshold: config.score_threshold,
            },
            config.max_payload_bytes,
            config.truncate_oversized,
            stats.clone(),
        ));
        let reader = ShardReader::new(ReaderConfig::new(
            config.text_column.clone(),
            config.id_column.clone(),
        ));
        let detector = StabilityDetector::new(config.stability_interval, config.stability_rounds);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        let sink = ResultSink::new(&config.output_dir);

        Ok(Self {
            config,
            store,
            sink,
            executor,
            reader,
            detector,
            semaphore,
            stats,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shared run counters.
    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Flag the CLI's signal handler sets to wind the run down. In-flight
    /// batches finish and commit; nothing new is dispatched.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Execute one full pass over the data directory.
    pub async fn run(&self) -> Result<StatsSnapshot> {
        let discovery = discover(
            &self.config.data_dir,
            &self.store.snapshot(),
            self.config.resume,
        )?;
        for _ in 0..discovery.skipped_complete {
            self.stats.record_shard_skipped();
        }

        if discovery.shards.is_empty() {
            info!("No eligible shards to process");
            return Ok(self.stats.snapshot());
        }

        info!(
            shards = discovery.shards.len(),
            batch_size = self.config.batch_size,
            max_concurrent = self.config.max_concurrent,
            "Starting pipeline run"
        );

        let mut work = futures::stream::iter(
            discovery
                .shards
                .into_iter()
                .map(|shard| self.run_shard(shard)),
        )
        .buffer_unordered(self.config.shard_parallelism);

        while let Some(result) = work.next().await {
            if let Err(e) = result {
                // Stop dispatching so sibling shards wind down at a batch
                // boundary before the error propagates.
                self.shutdown.store(true, Ordering::Relaxed);
                return Err(e);
            }
        }

        let snapshot = self.stats.snapshot();
        info!(
            records_classified = snapshot.records_classified,
            records_failed = snapshot.records_failed,
            shards_completed = snapshot.shards_completed,
            elapsed_secs = snapshot.elapsed_secs,
            "Pipeline run finished"
        );
        Ok(snapshot)
    }

    /// Drive one shard from stability gate to finalized artifact.
    async fn run_shard(&self, shard: Shard) -> Result<()> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Ok(());
        }

        let fingerprint = match self.detector.wait_until_stable(&shard.path).await {
            StabilityStatus::Stable(fp) => fp,
            StabilityStatus::Stalled => {
                self.stats.record_shard_stalled();
                warn!(shard = %shard.shard_id, "Shard still being written upstream, skipping this run");
                return Ok(());
            }
        };

        // The file may have settled into a different state than discovery
        // observed; re-derive the resume position against the stable
        // fingerprint.
        let checkpoint = self.store.get(&shard.shard_id);
        let checkpoint_current = checkpoint
            .as_ref()
            .map(|cp| cp.matches(&fingerprint))
            .unwrap_or(false);
        let (resume_offset, committed_bytes) = match &checkpoint {
            Some(cp) if checkpoint_current => (cp.committed_offset, cp.committed_bytes),
            _ => (0, 0),
        };

        // A crash between artifact promotion and the completion flag leaves
        // a finalized artifact with an incomplete checkpoint. Finish the
        // bookkeeping instead of staging a fresh empty artifact over it.
        if checkpoint_current && self.sink.is_finalized(&shard.shard_id, committed_bytes) {
            info!(shard = %shard.shard_id, "Artifact already promoted, marking shard complete");
            self.store.mark_complete(&shard.shard_id).await?;
            self.stats.record_shard_completed();
            return Ok(());
        }

        info!(
            shard = %shard.shard_id,
            resume_offset,
            size_bytes = fingerprint.size_bytes,
            "Processing shard"
        );

        let mut sink = self
            .sink
            .open_shard(&shard.shard_id, committed_bytes)
            .await?;

        let (tx, mut rx) = mpsc::channel(8);
        let reader_task = spawn_reader(
            self.reader.clone(),
            shard.clone(),
            resume_offset,
            self.config.batch_size,
            tx,
            self.shutdown.clone(),
        );

        let mut in_flight: FuturesOrdered<
            tokio::task::JoinHandle<(Batch, BatchResult, OwnedSemaphorePermit)>,
        > = FuturesOrdered::new();
        let mut last_offset = resume_offset;
        let mut reader_failed: Option<ReaderError> = None;
        let mut interrupted = false;

        while let Some(item) = rx.recv().await {
            if self.shutdown.load(Ordering::Relaxed) {
                interrupted = true;
                break;
            }
            match item {
                Ok(batch) => {
                    // A permit is held until the batch's commit lands, so
                    // the semaphore bounds uncommitted batches as well as
                    // in-flight calls. Commit completed batches while
                    // waiting so held permits keep flowing back.
                    let permit = loop {
                        tokio::select! {
                            permit = self.semaphore.clone().acquire_owned() => {
                                break permit.map_err(|e| SfError::Other(anyhow::anyhow!(e)))?;
                            }
                            Some(done) = in_flight.next(), if !in_flight.is_empty() => {
                                last_offset = self.commit(&mut sink, &fingerprint, done).await?;
                            }
                        }
                    };

                    let executor = self.executor.clone();
                    in_flight.push_back(tokio::spawn(async move {
                        let result = executor.execute(&batch).await;
                        (batch, result, permit)
                    }));
                }
                Err(e) => {
                    reader_failed = Some(e);
                    break;
                }
            }
        }
        drop(rx);

        // Everything already dispatched still commits, in order.
        while let Some(done) = in_flight.next().await {
            last_offset = self.commit(&mut sink, &fingerprint, done).await?;
        }
        let _ = reader_task.await;

        if let Some(e) = reader_failed {
            self.stats.record_shard_corrupt();
            return match self.config.on_corrupt_shard {
                CorruptShardPolicy::Skip => {
                    warn!(shard = %shard.shard_id, error = %e, "Undecodable shard, leaving checkpoint untouched");
                    // Keep staged progress from earlier runs; an empty
                    // staging file is just litter.
                    if sink.committed_bytes() == 0 {
                        sink.discard().await?;
                    }
                    Ok(())
                }
                CorruptShardPolicy::Abort => Err(SfError::Reader(e)),
            };
        }

        if interrupted || self.shutdown.load(Ordering::Relaxed) {
            debug!(shard = %shard.shard_id, last_offset, "Shard interrupted, resumable");
            return Ok(());
        }

        // Ensure a checkpoint record exists even for shards that produced no
        // new batches. The artifact is promoted before the completion flag:
        // a crash in between is healed by the finalized-artifact check on
        // the next run, whereas the reverse order would strand the staging
        // file behind a checkpoint that says complete.
        self.store
            .advance(
                &shard.shard_id,
                &fingerprint,
                last_offset,
                sink.committed_bytes(),
            )
            .await?;
        sink.finalize().await?;
        self.store.mark_complete(&shard.shard_id).await?;
        self.stats.record_shard_completed();

        Ok(())
    }

    /// Sink commit, then checkpoint advance, then permit release. Order
    /// matters: the checkpoint must never run ahead of durable output, and
    /// the permit is only returned once the batch's lifecycle is over.
    async fn commit(
        &self,
        sink: &mut ShardSink,
        fingerprint: &Fingerprint,
        joined: std::result::Result<
            (Batch, BatchResult, OwnedSemaphorePermit),
            tokio::task::JoinError,
        >,
    ) -> Result<u64> {
        let (batch, result, _permit) =
            joined.map_err(|e| SfError::Other(anyhow::anyhow!("batch task panicked: {e}")))?;

        let before = sink.committed_bytes();
        let bytes = sink.commit(&batch, &result.outcomes).await?;
        self.stats.record_bytes_written(bytes - before);
        self.store
            .advance(&batch.shard_id, fingerprint, batch.end_offset(), bytes)
            .await?;

        let classified = result
            .outcomes
            .iter()
            .filter(|o| o.is_classified())
            .count() as u64;
        self.stats.record_classified(classified);
        self.stats
            .record_failed(result.outcomes.len() as u64 - classified);
        self.stats.record_batch_committed();
        if result.batch_failed {
            self.stats.record_batch_failed();
        }

        debug!(
            shard = %batch.shard_id,
            batch = batch.index,
            end_offset = batch.end_offset(),
            attempts = result.attempts,
            "Batch committed"
        );
        Ok(batch.end_offset())
    }
}

/// Decode a shard on a blocking thread, cutting records into batches.
///
/// Parquet decode is CPU- and file-I/O-bound; the bounded channel applies
/// backpressure so a fast reader cannot outrun the dispatch loop.
fn spawn_reader(
    reader: ShardReader,
    shard: Shard,
    resume_offset: u64,
    batch_size: usize,
    tx: mpsc::Sender<std::result::Result<Batch, ReaderError>>,
    shutdown: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let iter = match reader.open(&shard, resume_offset) {
            Ok(iter) => iter,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        };

        let mut records: Vec<Record> = Vec::with_capacity(batch_size);
        let mut index = 0u64;
        for item in iter {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            match item {
                Ok(record) => {
                    records.push(record);
                    if records.len() == batch_size {
                        let full = std::mem::replace(&mut records, Vec::with_capacity(batch_size));
                        let batch = Batch::new(&shard.shard_id, index, full);
                        index += 1;
                        if tx.blocking_send(Ok(batch)).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            }
        }

        if !records.is_empty() {
            let _ = tx.blocking_send(Ok(Batch::new(&shard.shard_id, index, records)));
        }
    })
}
