//! Batch ingestion pipeline: one shard, one pass, resumable.
//!
//! ```text
//! LoadingCheckpoint ──► StreamingBatches ──► Draining ──► Done
//!        │
//!        └──► Error (setup failure, or checkpoint append failure)
//! ```
//!
//! Identifiers are partitioned into local batches; each local batch, minus the
//! checkpointed set, is cut into remote batches bounded by the client's
//! protocol limit. After every remote batch the sink is flushed and only then
//! the batch's accepted ids are appended to the checkpoint. A crash between the
//! two leaves duplicates in the output, never checkpoint entries without data.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures_util::StreamExt;
use indicatif::ProgressBar;

use crate::checkpoint::Checkpoint;
use crate::client::RecordClient;
use crate::error::{FetchError, ShardError};
use crate::logging::ShardLog;
use crate::sanitize::{Outcome, Sanitizer};
use crate::shard::ShardSpec;
use crate::shutdown;
use crate::sink::CompressedSink;
use crate::stats::ShardStats;

/// Identifiers processed between two checkpoint-durability points
pub const DEFAULT_LOCAL_BATCH: usize = 1000;
/// Identifiers per remote fetch call
pub const DEFAULT_REMOTE_BATCH: usize = 100;
/// zstd level for record output
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub local_batch_size: usize,
    pub remote_batch_size: usize,
    pub compression_level: i32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            local_batch_size: DEFAULT_LOCAL_BATCH,
            remote_batch_size: DEFAULT_REMOTE_BATCH,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    LoadingCheckpoint,
    StreamingBatches,
    Draining,
    Done,
    Error,
}

/// How one remote batch ended
enum BatchEnd {
    Complete,
    Failed,
}

/// Resumable fetch loop for a single shard
pub struct Pipeline<C> {
    spec: ShardSpec,
    config: PipelineConfig,
    client: C,
    sanitizer: Sanitizer,
    log: ShardLog,
    progress: ProgressBar,
    shutdown: Arc<AtomicBool>,
    state: PipelineState,
}

impl<C: RecordClient> Pipeline<C> {
    pub fn new(spec: ShardSpec, config: PipelineConfig, client: C, log: ShardLog) -> Self {
        Self {
            spec,
            config,
            client,
            sanitizer: Sanitizer::default(),
            log,
            progress: ProgressBar::hidden(),
            shutdown: shutdown::shared_flag(),
            state: PipelineState::LoadingCheckpoint,
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Bar advanced by identifiers attempted; its length is set to the
    /// remaining work once the checkpoint is loaded.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Replace the process-wide shutdown flag (tests, embedding callers)
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn spec(&self) -> &ShardSpec {
        &self.spec
    }

    /// Ids per remote call: configured size clamped to the client's protocol
    /// limit and to the local batch size.
    pub fn remote_batch_size(&self) -> usize {
        self.config
            .remote_batch_size
            .min(self.client.max_batch_size())
            .min(self.config.local_batch_size)
            .max(1)
    }

    /// Run the shard to completion (or until shutdown is requested).
    pub async fn run(&mut self) -> Result<ShardStats, ShardError> {
        let start = Instant::now();
        self.transition(PipelineState::LoadingCheckpoint);
        let result = self.run_inner(start).await;
        if let Err(e) = &result {
            self.log.error(format!("shard failed: {e}"));
            self.transition(PipelineState::Error);
            self.client.close().await;
        }
        self.log.flush();
        result
    }

    async fn run_inner(&mut self, start: Instant) -> Result<ShardStats, ShardError> {
        let ids = self.spec.read_ids().map_err(|source| ShardError::Shard {
            path: self.spec.path.clone(),
            source,
        })?;
        let mut checkpoint =
            Checkpoint::load(&self.spec.checkpoint_path).map_err(|source| {
                ShardError::Checkpoint {
                    path: self.spec.checkpoint_path.clone(),
                    source,
                }
            })?;
        let mut sink = CompressedSink::create(
            &self.spec.output_path,
            self.spec.format,
            self.config.compression_level,
        )
        .map_err(|source| ShardError::Output {
            path: self.spec.output_path.clone(),
            source,
        })?;

        let skipped = ids.iter().filter(|id| checkpoint.contains(id)).count();
        let mut stats = ShardStats {
            stem: self.spec.stem.clone(),
            total: ids.len(),
            skipped,
            ..Default::default()
        };
        self.log.info(format!(
            "{} ids, {} already processed",
            ids.len(),
            skipped
        ));
        self.progress.set_length((ids.len() - skipped) as u64);
        self.progress.set_position(0);

        self.transition(PipelineState::StreamingBatches);
        let local_size = self.config.local_batch_size.max(1);
        let remote_size = self.remote_batch_size();

        'shard: for local in ids.chunks(local_size) {
            let pending: Vec<String> = local
                .iter()
                .filter(|id| !checkpoint.contains(id))
                .cloned()
                .collect();
            for batch in pending.chunks(remote_size) {
                if self.shutdown.load(Ordering::Relaxed) {
                    self.log.warn("shutdown requested, stopping between batches");
                    stats.interrupted = true;
                    break 'shard;
                }
                self.process_batch(batch, &mut sink, &mut checkpoint, &mut stats)
                    .await?;
                self.progress.inc(batch.len() as u64);
            }
        }

        self.transition(PipelineState::Draining);
        let output_path = self.spec.output_path.clone();
        sink.close().map_err(|source| ShardError::Output {
            path: output_path,
            source,
        })?;
        self.client.close().await;
        self.transition(PipelineState::Done);

        stats.elapsed = start.elapsed();
        self.log.info(format!(
            "done: {} written, {} rejected, {} failed batches in {:.1}s",
            stats.written,
            stats.rejected,
            stats.failed_batches(),
            stats.elapsed.as_secs_f64()
        ));
        Ok(stats)
    }

    /// One remote call: fetch, sanitize, write, then flush and checkpoint.
    ///
    /// Remote failures are absorbed here; only sink and checkpoint I/O errors
    /// propagate.
    async fn process_batch(
        &mut self,
        batch: &[String],
        sink: &mut CompressedSink,
        checkpoint: &mut Checkpoint,
        stats: &mut ShardStats,
    ) -> Result<(), ShardError> {
        stats.attempted += batch.len();
        stats.remote_batches += 1;

        let mut succeeded = Vec::with_capacity(batch.len());
        let mut last_seen: Option<String> = None;
        let mut end = BatchEnd::Complete;

        let mut records = self.client.fetch(batch);
        while let Some(item) = records.next().await {
            let raw = match item {
                Ok(raw) => raw,
                Err(e) if e.is_record_level() => {
                    stats.record_errors += 1;
                    self.log.error(format!("Error scraping submission: {e}"));
                    continue;
                }
                Err(e) => {
                    log_batch_error(&self.log, &e, batch, last_seen.as_deref());
                    if e.is_transient() {
                        stats.transient_failures += 1;
                    } else {
                        stats.other_failures += 1;
                    }
                    end = BatchEnd::Failed;
                    break;
                }
            };
            let id = raw.id.clone();
            last_seen = Some(id.clone());
            match self.sanitizer.sanitize(raw) {
                Outcome::Accepted(record) => {
                    sink.write(&record).map_err(|source| ShardError::Output {
                        path: self.spec.output_path.clone(),
                        source,
                    })?;
                    succeeded.push(id);
                }
                Outcome::Rejected { id, dropped_fields } => {
                    stats.rejected += 1;
                    self.log.error(format!(
                        "Non-serializable objects found in submission {id}: {}",
                        dropped_fields.join(", ")
                    ));
                }
            }
        }
        drop(records);

        if let BatchEnd::Failed = end {
            // Nothing from this batch is marked processed; all of it is retried next run
            stats.unchecked += succeeded.len();
            return Ok(());
        }

        sink.flush().map_err(|source| ShardError::Output {
            path: self.spec.output_path.clone(),
            source,
        })?;
        checkpoint
            .append(&succeeded)
            .map_err(|source| ShardError::Checkpoint {
                path: self.spec.checkpoint_path.clone(),
                source,
            })?;
        stats.written += succeeded.len();
        self.log.debug(format!(
            "batch at {}: {}/{} records",
            batch[0],
            succeeded.len(),
            batch.len()
        ));
        Ok(())
    }

    fn transition(&mut self, next: PipelineState) {
        self.log.debug(format!("state {:?} -> {next:?}", self.state));
        self.state = next;
    }
}

fn log_batch_error(log: &ShardLog, e: &FetchError, batch: &[String], last_seen: Option<&str>) {
    let first = batch.first().map(String::as_str).unwrap_or("");
    if e.is_transient() {
        log.error(format!("Connection error scraping batch starting from {first}: {e}"));
    } else {
        let id = last_seen.unwrap_or(first);
        log.error(format!("Error scraping submission {id}: {e}"));
    }
}
