//! Scrape subcommand - fetch submissions for a dataset's id shards

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Args;

use refetch_core::{
    PipelineConfig, RunOutcome, RunnerConfig, SHARED_RUNTIME, ShardError, ShardLayout,
    ShardSelection, SharedProgress, http_client, run_shards,
};
use refetch_reddit::{Credentials, RedditClient};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct ScrapeArgs {
    /// Dataset name; shards live in <basefolder>/data/ids/batched/submission_ids_<DATASET>
    #[arg(short, long)]
    pub dataset: String,

    /// Credential JSON file (client_id, client_secret, user_agent, username, password)
    #[arg(short, long)]
    pub auth: Option<PathBuf>,

    /// Root folder holding data/ and log/
    #[arg(short, long)]
    pub basefolder: Option<PathBuf>,

    /// Inclusive shard number range, e.g. "1,10"
    #[arg(short = 'r', long, conflicts_with = "shard")]
    pub split_range: Option<String>,

    /// Process a single shard file instead of a range
    #[arg(short, long)]
    pub shard: Option<PathBuf>,

    /// Number of shards processed in parallel
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Ids read from the shard per checkpoint batch
    #[arg(long)]
    pub local_batch: Option<usize>,

    /// Ids per API call (capped at 100)
    #[arg(long)]
    pub remote_batch: Option<usize>,

    /// Output format: zstd, gzip or plain
    #[arg(short, long)]
    pub format: Option<String>,

    /// Compression level for zstd (1-22) or gzip (0-9)
    #[arg(short = 'z', long)]
    pub compression_level: Option<i32>,
}

impl ScrapeArgs {
    fn selection(&self) -> Result<ShardSelection> {
        Ok(match (&self.shard, &self.split_range) {
            (Some(path), _) => ShardSelection::File(path.clone()),
            (None, Some(range)) => ShardSelection::parse_range(range)?,
            (None, None) => ShardSelection::All,
        })
    }
}

pub fn run(args: ScrapeArgs, config: &Config, progress: &SharedProgress) -> Result<RunOutcome> {
    let format = match &args.format {
        Some(name) => refetch_core::SinkFormat::from_name(name)
            .ok_or_else(|| anyhow::anyhow!("unknown output format {name:?}"))?,
        None => config.output.sink_format()?,
    };
    let base_dir = args
        .basefolder
        .clone()
        .unwrap_or_else(|| config.output.base_dir.clone());
    let layout = ShardLayout::new(base_dir, &args.dataset, format);
    let shards = layout.select(&args.selection()?)?;
    if shards.is_empty() {
        bail!("no shards selected in {}", layout.shard_dir().display());
    }

    let auth_file = args
        .auth
        .clone()
        .unwrap_or_else(|| config.reddit.auth_file.clone());
    let credentials = Credentials::load(&auth_file)?
        .with_user_agent(config.reddit.user_agent.as_deref());
    log::debug!("{credentials:?}");
    let endpoints = config.reddit.endpoints();

    let runner = RunnerConfig {
        workers: config.workers.resolve(args.workers),
        pipeline: PipelineConfig {
            local_batch_size: args.local_batch.unwrap_or(config.batch.local),
            remote_batch_size: args.remote_batch.unwrap_or(config.batch.remote),
            compression_level: args
                .compression_level
                .unwrap_or(config.output.compression_level),
        },
        ..RunnerConfig::default()
    };
    log::info!(
        "Scraping {} shards of {} ({} output, {} workers)",
        shards.len(),
        args.dataset,
        format,
        runner.workers
    );

    let outcome = run_shards(shards, &runner, progress, |_| {
        let mut client =
            RedditClient::new(http_client().clone(), credentials.clone(), endpoints.clone());
        // Bad credentials fail the shard up front instead of every batch
        SHARED_RUNTIME
            .handle()
            .block_on(client.token())
            .map_err(|e| ShardError::Client(e.to_string()))?;
        Ok(client)
    })?;

    if progress.is_tty() {
        outcome.summary.print();
    } else {
        outcome.summary.log();
    }
    Ok(outcome)
}
