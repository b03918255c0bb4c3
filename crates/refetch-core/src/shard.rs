//! Identifier shards: on-disk layout, selection and splitting.
//!
//! Layout under a base directory for dataset `D`:
//!
//! ```text
//! data/ids/batched/submission_ids_D/submission_ids_D_<n>.txt      shard input
//! data/ids/batched/submission_ids_D/processed/<stem>_processed.csv checkpoint
//! data/submissions_D/<stem>.ndjson.zst                            output
//! log/submissions_D/<stem>_scrapelog.log                          log (all)
//! log/submissions_D/<stem>_errorlog.log                           log (errors)
//! ```

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use rustc_hash::FxHashSet;

use crate::sink::SinkFormat;

/// Directory layout for one dataset
#[derive(Debug, Clone)]
pub struct ShardLayout {
    pub base_dir: PathBuf,
    pub dataset: String,
    pub format: SinkFormat,
}

impl ShardLayout {
    pub fn new(base_dir: impl Into<PathBuf>, dataset: impl Into<String>, format: SinkFormat) -> Self {
        Self {
            base_dir: base_dir.into(),
            dataset: dataset.into(),
            format,
        }
    }

    /// Shard file name prefix: `submission_ids_<dataset>`
    pub fn prefix(&self) -> String {
        format!("submission_ids_{}", self.dataset)
    }

    pub fn shard_dir(&self) -> PathBuf {
        self.base_dir
            .join("data/ids/batched")
            .join(self.prefix())
    }

    /// Path of shard number `n`
    pub fn shard_path(&self, n: u32) -> PathBuf {
        self.shard_dir().join(format!("{}_{n}.txt", self.prefix()))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.base_dir
            .join("data")
            .join(format!("submissions_{}", self.dataset))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.base_dir
            .join("log")
            .join(format!("submissions_{}", self.dataset))
    }

    /// Resolve every artifact path for a shard file.
    pub fn spec(&self, path: &Path) -> ShardSpec {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let shard_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let log_dir = self.log_dir();
        ShardSpec {
            path: path.to_path_buf(),
            checkpoint_path: shard_dir
                .join("processed")
                .join(format!("{stem}_processed.csv")),
            output_path: self
                .output_dir()
                .join(format!("{stem}.{}", self.format.extension())),
            log_path: log_dir.join(format!("{stem}_scrapelog.log")),
            error_log_path: log_dir.join(format!("{stem}_errorlog.log")),
            format: self.format,
            stem,
        }
    }

    /// Resolve a selection to shard specs, in processing order.
    pub fn select(&self, selection: &ShardSelection) -> anyhow::Result<Vec<ShardSpec>> {
        let paths = match selection {
            ShardSelection::File(path) => vec![path.clone()],
            ShardSelection::Range { start, end } => {
                if start > end {
                    bail!("empty shard range {start},{end}");
                }
                (*start..=*end).map(|n| self.shard_path(n)).collect()
            }
            ShardSelection::All => {
                let dir = self.shard_dir();
                let pattern = dir.join("*.txt");
                let mut paths: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
                    .context("invalid glob pattern")?
                    .filter_map(Result::ok)
                    .filter(|p| p.is_file())
                    .collect();
                if paths.is_empty() {
                    bail!("no shard files in {}", dir.display());
                }
                paths.sort_by_key(|p| (shard_number(p), p.clone()));
                paths
            }
        };
        Ok(paths.iter().map(|p| self.spec(p)).collect())
    }
}

/// Which shard files a run processes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardSelection {
    /// One explicit shard file
    File(PathBuf),
    /// Shard numbers `start..=end` in the dataset's shard directory
    Range { start: u32, end: u32 },
    /// Every `*.txt` file in the dataset's shard directory
    All,
}

impl ShardSelection {
    /// Parse `"start,end"` (inclusive on both ends)
    pub fn parse_range(s: &str) -> anyhow::Result<Self> {
        let Some((a, b)) = s.split_once(',') else {
            bail!("invalid range {s:?}, expected \"start,end\"");
        };
        let start = a
            .trim()
            .parse()
            .with_context(|| format!("invalid range start {a:?}"))?;
        let end = b
            .trim()
            .parse()
            .with_context(|| format!("invalid range end {b:?}"))?;
        Ok(Self::Range { start, end })
    }
}

/// Numeric suffix of `<prefix>_<n>.txt`; shards without one sort last
fn shard_number(path: &Path) -> u64 {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit('_').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(u64::MAX)
}

/// Every artifact of one shard run
#[derive(Debug, Clone)]
pub struct ShardSpec {
    pub path: PathBuf,
    /// File name without extension, names every derived artifact
    pub stem: String,
    pub checkpoint_path: PathBuf,
    pub output_path: PathBuf,
    pub log_path: PathBuf,
    pub error_log_path: PathBuf,
    pub format: SinkFormat,
}

impl ShardSpec {
    /// Read the shard's identifiers in file order
    pub fn read_ids(&self) -> io::Result<Vec<String>> {
        read_ids(&self.path)
    }
}

/// Identifiers from a one-column file: first comma-separated field of each
/// line, trimmed; blank lines skipped.
pub fn read_ids(path: &Path) -> io::Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter_map(|line| {
            let id = line.split(',').next().unwrap_or("").trim();
            (!id.is_empty()).then(|| id.to_string())
        })
        .collect())
}

/// Result of [`split`]
#[derive(Debug, Clone)]
pub struct SplitOutcome {
    pub shard_dir: PathBuf,
    pub shards: Vec<PathBuf>,
    pub ids: usize,
    pub removed: usize,
}

/// Split an identifier list into numbered shard files of `batch_size` ids.
///
/// Shards go to `<input dir>/batched/<input stem>/<input stem>_<n>.txt`,
/// numbered from 1. Ids listed in `remove` are dropped first.
pub fn split(input: &Path, batch_size: usize, remove: Option<&Path>) -> anyhow::Result<SplitOutcome> {
    if batch_size == 0 {
        bail!("batch size must be positive");
    }
    let mut ids =
        read_ids(input).with_context(|| format!("cannot read {}", input.display()))?;

    let mut removed = 0;
    if let Some(remove) = remove {
        let drop: FxHashSet<String> = read_ids(remove)
            .with_context(|| format!("cannot read {}", remove.display()))?
            .into_iter()
            .collect();
        let before = ids.len();
        ids.retain(|id| !drop.contains(id));
        removed = before - ids.len();
    }

    let name = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .context("input has no file name")?;
    let shard_dir = input
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("batched")
        .join(&name);
    fs::create_dir_all(&shard_dir)
        .with_context(|| format!("cannot create {}", shard_dir.display()))?;

    let mut shards = Vec::new();
    for (i, chunk) in ids.chunks(batch_size).enumerate() {
        let path = shard_dir.join(format!("{name}_{}.txt", i + 1));
        write_ids(&path, chunk).with_context(|| format!("cannot write {}", path.display()))?;
        shards.push(path);
    }
    log::info!(
        "Split {} ids into {} shards in {} ({} removed)",
        ids.len(),
        shards.len(),
        shard_dir.display(),
        removed
    );
    Ok(SplitOutcome {
        shard_dir,
        shards,
        ids: ids.len(),
        removed,
    })
}

fn write_ids(path: &Path, ids: &[String]) -> io::Result<()> {
    let mut w = BufWriter::new(fs::File::create(path)?);
    for id in ids {
        writeln!(w, "{id}")?;
    }
    w.flush()
}
