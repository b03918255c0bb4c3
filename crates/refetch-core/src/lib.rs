//! Refetch Core - resumable batch ingestion of remote records
//!
//! Turns shard files of identifiers into checkpointed, compressed NDJSON
//! record streams: fetch in bounded batches, sanitize, write, flush, then
//! checkpoint. Safe to interrupt and rerun at any point.

pub mod checkpoint;
pub mod client;
pub mod error;
pub mod http;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod runner;
pub mod sanitize;
pub mod shard;
pub mod shutdown;
pub mod sink;
pub mod stats;
pub mod work_queue;

// Re-exports for convenience
pub use checkpoint::Checkpoint;
pub use client::{EntityRef, PollData, PollOption, RawRecord, RawValue, RecordClient, RecordStream};
pub use error::{FetchError, ShardError};
pub use http::{HttpConfig, SHARED_RUNTIME, http_client, http_config, set_http_config};
pub use logging::{IndicatifLogger, ShardLog, init_logging};
pub use pipeline::{Pipeline, PipelineConfig, PipelineState};
pub use progress::{ProgressContext, SharedProgress};
pub use retry::retry_with_backoff;
pub use runner::{RunOutcome, RunnerConfig, run_shards};
pub use sanitize::{CanonicalRecord, Outcome, Rule, Sanitizer};
pub use shard::{ShardLayout, ShardSelection, ShardSpec};
pub use shutdown::{install_signal_handlers, is_shutdown_requested, request_shutdown, shutdown_flag};
pub use sink::{CompressedSink, SinkFormat};
pub use stats::{RunSummary, ShardStats};
