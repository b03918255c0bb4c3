//! Multi-shard execution: one pipeline per shard on a rayon worker pool.
//!
//! Shards share no mutable state. Each worker claims a shard from the
//! [`WorkQueue`], builds that shard's client and log, and drives the async
//! pipeline to completion on [`SHARED_RUNTIME`]. A shard that fails setup is
//! counted and logged; the others keep running.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;

use crate::client::RecordClient;
use crate::error::ShardError;
use crate::http::SHARED_RUNTIME;
use crate::logging::ShardLog;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::progress::SharedProgress;
use crate::sanitize::Sanitizer;
use crate::shard::ShardSpec;
use crate::shutdown::is_shutdown_requested;
use crate::stats::{RunSummary, ShardStats};
use crate::work_queue::WorkQueue;

/// Exit code after SIGINT/SIGTERM
pub const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub workers: usize,
    pub pipeline: PipelineConfig,
    pub sanitizer: Sanitizer,
    /// Write per-shard log files (`false`: console only)
    pub shard_logs: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            pipeline: PipelineConfig::default(),
            sanitizer: Sanitizer::default(),
            shard_logs: true,
        }
    }
}

/// Result of a whole run
#[derive(Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub shards: Vec<ShardStats>,
    /// Shards that ended in a setup or checkpoint error
    pub failed: usize,
    pub interrupted: bool,
}

impl RunOutcome {
    /// 0 all shards done, 1 any shard failed, 130 interrupted
    pub fn exit_code(&self) -> u8 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else if self.failed > 0 {
            1
        } else {
            0
        }
    }
}

/// Run every shard; `make_client` builds one fresh client per shard.
pub fn run_shards<C, F>(
    shards: Vec<ShardSpec>,
    config: &RunnerConfig,
    progress: &SharedProgress,
    make_client: F,
) -> anyhow::Result<RunOutcome>
where
    C: RecordClient,
    F: Fn(&ShardSpec) -> Result<C, ShardError> + Sync,
{
    let workers = config.workers.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("Failed to create thread pool")?;

    let queue = WorkQueue::new(shards);
    let total = queue.total();
    log::info!("{total} shards, {workers} workers");

    let shard_stats: Mutex<Vec<ShardStats>> = Mutex::new(Vec::with_capacity(total));
    let failed = AtomicUsize::new(0);
    let is_tty = progress.is_tty();

    pool.install(|| {
        rayon::scope(|s| {
            for _ in 0..workers {
                s.spawn(|_| {
                    while let Some((n, shard)) = queue.next() {
                        if is_shutdown_requested() {
                            break;
                        }
                        log::debug!("[{n}/{total}] {}", shard.stem);
                        let pb = progress.shard_bar(&shard.stem, 0);
                        let result = run_one(shard, config, &make_client, pb.clone());
                        pb.finish_and_clear();
                        match result {
                            Ok(stats) => {
                                if !is_tty {
                                    stats.log();
                                }
                                shard_stats
                                    .lock()
                                    .expect("worker thread panicked")
                                    .push(stats);
                            }
                            Err(e) => {
                                log::error!("{}: {e}", shard.stem);
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                });
            }
        });
    });

    let mut shards = shard_stats.into_inner().expect("worker thread panicked");
    shards.sort_by(|a, b| a.stem.cmp(&b.stem));
    let failed = failed.into_inner();
    let interrupted = is_shutdown_requested() || shards.iter().any(|s| s.interrupted);
    let summary = RunSummary::from_shards(&shards, total, failed);

    Ok(RunOutcome {
        summary,
        shards,
        failed,
        interrupted,
    })
}

/// Set up and run a single shard on the shared runtime
fn run_one<C, F>(
    shard: &ShardSpec,
    config: &RunnerConfig,
    make_client: &F,
    pb: indicatif::ProgressBar,
) -> Result<ShardStats, ShardError>
where
    C: RecordClient,
    F: Fn(&ShardSpec) -> Result<C, ShardError>,
{
    let log = if config.shard_logs {
        ShardLog::open(shard.stem.as_str(), &shard.log_path, &shard.error_log_path).map_err(
            |source| ShardError::Output {
                path: shard.log_path.clone(),
                source,
            },
        )?
    } else {
        ShardLog::console(shard.stem.as_str())
    };
    let client = make_client(shard)?;
    let mut pipeline = Pipeline::new(shard.clone(), config.pipeline, client, log)
        .with_sanitizer(config.sanitizer.clone())
        .with_progress(pb);
    SHARED_RUNTIME.handle().block_on(pipeline.run())
}
