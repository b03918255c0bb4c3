//! End-to-end pipeline behaviour against a scripted in-memory client.
//!
//! Covers resumption, durability ordering, rejection handling and batch
//! boundaries without any network access.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use futures_util::stream;
use refetch_core::client::{EntityRef, RawRecord, RawValue, RecordClient, RecordStream};
use refetch_core::sink::recover_records;
use refetch_core::{
    Checkpoint, FetchError, Pipeline, PipelineConfig, PipelineState, ShardLayout, ShardLog,
    ShardSpec, ShardStats, SinkFormat,
};
use tempfile::TempDir;

/// Canned remote behaviour, keyed by id and by call number
#[derive(Clone, Default)]
struct Script {
    /// Ids the remote does not know (no record returned)
    missing: HashSet<String>,
    /// Ids returned with a field that has no JSON form
    unserializable: HashSet<String>,
    /// Ids reported as inline per-record errors
    record_errors: HashSet<String>,
    /// Call index → (records delivered before failing, batch error)
    failures: HashMap<usize, (usize, FetchError)>,
    /// Replaced by a plain file during the first call
    block_dir: Option<PathBuf>,
}

struct ScriptedClient {
    script: Script,
    max: usize,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl RecordClient for ScriptedClient {
    fn max_batch_size(&self) -> usize {
        self.max
    }

    fn fetch<'a>(&'a mut self, ids: &'a [String]) -> RecordStream<'a> {
        let mut calls = self.calls.lock().unwrap();
        let call = calls.len();
        calls.push(ids.to_vec());
        if call == 0 {
            if let Some(dir) = &self.script.block_dir {
                fs::write(dir, "").unwrap();
            }
        }

        let mut items = Vec::new();
        for id in ids {
            if self.script.missing.contains(id) {
                continue;
            }
            if self.script.record_errors.contains(id) {
                items.push(Err(FetchError::Record {
                    id: id.clone(),
                    message: "malformed listing entry".into(),
                }));
                continue;
            }
            let mut raw = RawRecord::new(id.as_str())
                .with("id", id.as_str())
                .with("title", format!("post {id}"))
                .with("subreddit", EntityRef::named("rust"))
                .with("author", EntityRef::anonymous())
                .with("_reddit", RawValue::Opaque("Reddit".into()));
            if self.script.unserializable.contains(id) {
                raw = raw.with("media_stream", RawValue::Opaque("StreamHandle".into()));
            }
            items.push(Ok(raw));
        }
        if let Some((after, err)) = self.script.failures.get(&call) {
            items.truncate(*after);
            items.push(Err(err.clone()));
        }
        Box::pin(stream::iter(items))
    }
}

struct Fixture {
    _dir: TempDir,
    spec: ShardSpec,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl Fixture {
    fn new(n: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let layout = ShardLayout::new(dir.path(), "test", SinkFormat::Zstd);
        fs::create_dir_all(layout.shard_dir()).unwrap();
        let path = layout.shard_path(1);
        let ids: Vec<String> = (0..n).map(|i| format!("s{i:03}")).collect();
        fs::write(&path, format!("{}\n", ids.join("\n"))).unwrap();
        Self {
            spec: layout.spec(&path),
            _dir: dir,
            calls: Arc::default(),
        }
    }

    async fn run(&self, local: usize, remote: usize, script: &Script) -> ShardStats {
        let client = ScriptedClient {
            script: script.clone(),
            max: 100,
            calls: Arc::clone(&self.calls),
        };
        let config = PipelineConfig {
            local_batch_size: local,
            remote_batch_size: remote,
            ..Default::default()
        };
        let mut pipeline = Pipeline::new(self.spec.clone(), config, client, ShardLog::console("test"))
            .with_shutdown_flag(Arc::new(AtomicBool::new(false)));
        let stats = pipeline.run().await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Done);
        stats
    }

    fn take_calls(&self) -> Vec<Vec<String>> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// Ids of every record in the output, in file order
    fn output_ids(&self) -> Vec<String> {
        if !self.spec.output_path.exists() {
            return Vec::new();
        }
        recover_records(&self.spec.output_path, SinkFormat::Zstd)
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect()
    }

    fn checkpoint_lines(&self) -> Vec<String> {
        fs::read_to_string(&self.spec.checkpoint_path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint::load(&self.spec.checkpoint_path).unwrap()
    }
}

fn id(i: usize) -> String {
    format!("s{i:03}")
}

fn ids(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(id).collect()
}

#[tokio::test]
async fn idempotent_resumption() {
    let fx = Fixture::new(23);
    let script = Script {
        missing: [id(4)].into(),
        ..Default::default()
    };

    let first = fx.run(10, 4, &script).await;
    assert_eq!(first.written, 22);
    let lines_after_first = fx.checkpoint_lines();
    let output_after_first = fx.output_ids();
    fx.take_calls();

    // s004 is missing remotely, so it stays unprocessed and is asked for again
    let second = fx.run(10, 4, &script).await;
    assert_eq!(fx.take_calls(), vec![vec![id(4)]]);
    assert_eq!(second.skipped, 22);
    assert_eq!(second.written, 0);
    assert_eq!(fx.checkpoint_lines(), lines_after_first);
    assert_eq!(fx.output_ids(), output_after_first);
}

#[tokio::test]
async fn fully_processed_shard_does_no_fetching() {
    let fx = Fixture::new(12);
    fx.run(5, 5, &Script::default()).await;
    fx.take_calls();

    let again = fx.run(5, 5, &Script::default()).await;
    assert!(fx.take_calls().is_empty());
    assert_eq!(again.attempted, 0);
    assert_eq!(again.skipped, 12);
    assert_eq!(fx.output_ids().len(), 12);
}

#[tokio::test]
async fn no_silent_data_loss() {
    let fx = Fixture::new(30);
    let script = Script {
        missing: [id(1), id(17)].into(),
        unserializable: [id(3)].into(),
        record_errors: [id(8)].into(),
        failures: [(
            2,
            (
                1,
                FetchError::Api {
                    status: Some(500),
                    message: "boom".into(),
                },
            ),
        )]
        .into(),
        ..Default::default()
    };
    fx.run(10, 5, &script).await;

    let output: HashSet<String> = fx.output_ids().into_iter().collect();
    let checkpoint = fx.checkpoint();
    for i in 0..30 {
        if checkpoint.contains(&id(i)) {
            assert!(output.contains(&id(i)), "{} checkpointed without output", id(i));
        }
    }
    assert!(!checkpoint.contains(&id(1)));
    assert!(!checkpoint.contains(&id(3)));
    assert!(!checkpoint.contains(&id(8)));
}

#[tokio::test]
async fn crash_between_flush_and_checkpoint_duplicates_output() {
    let fx = Fixture::new(10);
    fx.run(10, 4, &Script::default()).await;
    assert_eq!(fx.output_ids(), ids(0..10));

    // Simulate a crash after the last batch's sink flush but before its
    // checkpoint append: output has s008..s009, checkpoint does not.
    let lines = fx.checkpoint_lines();
    assert_eq!(lines, ids(0..10));
    fs::write(&fx.spec.checkpoint_path, format!("{}\n", lines[..8].join("\n"))).unwrap();
    fx.take_calls();

    let rerun = fx.run(10, 4, &Script::default()).await;
    assert_eq!(fx.take_calls(), vec![ids(8..10)]);
    assert_eq!(rerun.written, 2);

    // Duplicated, never missing
    let mut expected = ids(0..10);
    expected.extend(ids(8..10));
    assert_eq!(fx.output_ids(), expected);

    // Checkpoint now holds each id exactly once
    assert_eq!(fx.checkpoint_lines(), ids(0..10));
}

#[tokio::test]
async fn torn_checkpoint_line_is_refetched() {
    let fx = Fixture::new(6);
    fx.run(10, 3, &Script::default()).await;
    // Crash mid-append: last id only partly written
    fs::write(&fx.spec.checkpoint_path, "s000\ns001\ns002\ns003\ns0").unwrap();
    fx.take_calls();

    fx.run(10, 3, &Script::default()).await;
    assert_eq!(fx.take_calls(), vec![ids(4..6)]);
    assert_eq!(fx.checkpoint_lines(), ids(0..6));
}

#[tokio::test]
async fn rejected_record_is_excluded() {
    let fx = Fixture::new(5);
    let script = Script {
        unserializable: [id(2)].into(),
        ..Default::default()
    };
    let stats = fx.run(10, 10, &script).await;

    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.written, 4);
    assert!(!fx.output_ids().contains(&id(2)));
    assert!(!fx.checkpoint().contains(&id(2)));

    // And it is fetched again on the next run
    fx.take_calls();
    fx.run(10, 10, &script).await;
    assert_eq!(fx.take_calls(), vec![vec![id(2)]]);
}

#[tokio::test]
async fn accepted_records_are_sanitized() {
    let fx = Fixture::new(1);
    fx.run(10, 10, &Script::default()).await;
    let records = recover_records(&fx.spec.output_path, SinkFormat::Zstd).unwrap();
    let rec = &records[0];
    assert_eq!(rec["subreddit"], "rust");
    assert!(rec["author"].is_null());
    assert!(!rec.contains_key("_reddit"));
    assert!(rec["retrieved_utc"].as_i64().unwrap() > 1_600_000_000);
}

#[tokio::test]
async fn batch_boundaries() {
    // N=25, L=10, R=3: local batches of 10, 10, 5 → 4 + 4 + 2 remote calls
    let fx = Fixture::new(25);
    let stats = fx.run(10, 3, &Script::default()).await;
    let calls = fx.take_calls();

    let sizes: Vec<usize> = calls.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![3, 3, 3, 1, 3, 3, 3, 1, 3, 2]);
    assert_eq!(stats.remote_batches, 10);

    // Every identifier in exactly one call
    let flat: Vec<String> = calls.into_iter().flatten().collect();
    assert_eq!(flat, ids(0..25));
}

#[tokio::test]
async fn batch_boundaries_with_partial_checkpoint() {
    // Checkpointed ids are removed before remote batching, per local batch
    let fx = Fixture::new(10);
    Checkpoint::load(&fx.spec.checkpoint_path)
        .unwrap()
        .append(&[id(0), id(1), id(2), id(6)])
        .unwrap();
    fx.run(5, 2, &Script::default()).await;
    assert_eq!(
        fx.take_calls(),
        vec![vec![id(3), id(4)], vec![id(5), id(7)], vec![id(8), id(9)]]
    );
}

#[tokio::test]
async fn transient_error_isolated_to_its_batch() {
    let fx = Fixture::new(9);
    let script = Script {
        failures: [(
            1,
            (0, FetchError::from_message("Cannot connect to host oauth.reddit.com:443")),
        )]
        .into(),
        ..Default::default()
    };
    let stats = fx.run(9, 3, &script).await;

    assert_eq!(stats.transient_failures, 1);
    assert_eq!(stats.attempted, 9);
    let checkpoint = fx.checkpoint();
    for i in 0..9 {
        let in_failed_batch = (3..6).contains(&i);
        assert_eq!(checkpoint.contains(&id(i)), !in_failed_batch, "{}", id(i));
    }
    let mut expected = ids(0..3);
    expected.extend(ids(6..9));
    assert_eq!(fx.output_ids(), expected);

    // Next run retries exactly the failed batch
    fx.take_calls();
    fx.run(9, 3, &Script::default()).await;
    assert_eq!(fx.take_calls(), vec![ids(3..6)]);
}

#[tokio::test]
async fn api_error_mid_batch_leaves_batch_unchecked() {
    let fx = Fixture::new(4);
    let script = Script {
        failures: [(
            0,
            (
                2,
                FetchError::Api {
                    status: Some(502),
                    message: "bad gateway".into(),
                },
            ),
        )]
        .into(),
        ..Default::default()
    };
    let stats = fx.run(4, 4, &script).await;
    assert_eq!(stats.other_failures, 1);
    assert_eq!(stats.written, 0);
    assert!(fx.checkpoint().is_empty());
    // The two records delivered before the error still reach the output
    assert_eq!(stats.unchecked, 2);
    assert_eq!(fx.output_ids(), ids(0..2));
}

#[tokio::test]
async fn record_error_does_not_abort_batch() {
    let fx = Fixture::new(4);
    let script = Script {
        record_errors: [id(1)].into(),
        ..Default::default()
    };
    let stats = fx.run(4, 4, &script).await;
    assert_eq!(stats.record_errors, 1);
    assert_eq!(stats.written, 3);
    assert_eq!(fx.checkpoint_lines(), vec![id(0), id(2), id(3)]);
}

#[tokio::test]
async fn unwritable_output_is_setup_error() {
    let fx = Fixture::new(2);
    // A directory where the output file should be
    fs::create_dir_all(&fx.spec.output_path).unwrap();
    let client = ScriptedClient {
        script: Script::default(),
        max: 100,
        calls: Arc::clone(&fx.calls),
    };
    let mut pipeline = Pipeline::new(
        fx.spec.clone(),
        PipelineConfig::default(),
        client,
        ShardLog::console("test"),
    );
    let err = pipeline.run().await.unwrap_err();
    assert!(matches!(err, refetch_core::ShardError::Output { .. }));
    assert_eq!(pipeline.state(), PipelineState::Error);
    assert!(fx.take_calls().is_empty());
}

#[tokio::test]
async fn checkpoint_append_failure_is_fatal() {
    let fx = Fixture::new(6);
    let script = Script {
        block_dir: fx.spec.checkpoint_path.parent().map(PathBuf::from),
        ..Default::default()
    };
    let client = ScriptedClient {
        script,
        max: 100,
        calls: Arc::clone(&fx.calls),
    };
    let config = PipelineConfig {
        local_batch_size: 6,
        remote_batch_size: 3,
        ..Default::default()
    };
    let mut pipeline = Pipeline::new(fx.spec.clone(), config, client, ShardLog::console("test"))
        .with_shutdown_flag(Arc::new(AtomicBool::new(false)));

    let err = pipeline.run().await.unwrap_err();
    assert!(matches!(err, refetch_core::ShardError::Checkpoint { .. }));
    assert_eq!(pipeline.state(), PipelineState::Error);
    // Stops at the first batch; its records were flushed before the append
    assert_eq!(fx.take_calls(), vec![ids(0..3)]);
    assert_eq!(fx.output_ids(), ids(0..3));
}
