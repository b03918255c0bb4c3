//! Checkpoint store: the per-shard set of identifiers already durably emitted.
//!
//! Persisted as an append-only log, one identifier per line. The log is read in
//! full at startup; duplicate lines (left by a crash between sink flush and
//! checkpoint append on a previous run) collapse in the set. A final line with
//! no terminating newline is a torn write: it is ignored on load and cut off
//! before the next append.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;

/// Processed-identifier set for one shard, backed by its append log
#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    ids: FxHashSet<String>,
    /// Byte length of the intact prefix when the log ends in a torn line
    torn_at: Option<u64>,
}

impl Checkpoint {
    /// Read the checkpoint log at `path`; empty set if it does not exist yet.
    pub fn load(path: &Path) -> io::Result<Self> {
        let mut ids = FxHashSet::default();
        let mut torn_at = None;
        match fs::read_to_string(path) {
            Ok(content) => {
                let intact = content.rfind('\n').map_or(0, |i| i + 1);
                if intact < content.len() {
                    log::warn!("{}: ignoring torn last line", path.display());
                    torn_at = Some(intact as u64);
                }
                for line in content[..intact].lines() {
                    let id = line.trim();
                    if !id.is_empty() {
                        ids.insert(id.to_string());
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(Self {
            path: path.to_path_buf(),
            ids,
            torn_at,
        })
    }

    /// Durably append `ids`, one per line, then record them in memory.
    ///
    /// The log is always opened in append mode, so a failure mid-write can only
    /// leave a partial tail; previously appended lines are never touched.
    /// One flush + `sync_data` per call.
    pub fn append(&mut self, ids: &[String]) -> io::Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Some(len) = self.torn_at {
            OpenOptions::new().write(true).open(&self.path)?.set_len(len)?;
            self.torn_at = None;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for id in ids {
            writeln!(writer, "{id}")?;
        }
        writer.flush()?;
        writer.get_ref().sync_data()?;
        self.ids.extend(ids.iter().cloned());
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
