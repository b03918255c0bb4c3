//! Compressed output sink: newline-delimited JSON over a streaming compressor.
//!
//! Every [`CompressedSink::flush`] ends the current compression frame (zstd
//! frame / gzip member) and syncs the file, so each flush point is the end of a
//! complete frame. Readers that handle concatenated frames decode everything
//! up to the last flush even if the writer dies before `close()`. The file is
//! opened in append mode: a resumed run adds frames after the previous run's.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

use crate::sanitize::CanonicalRecord;

/// Output buffer ahead of the compressor (256KB)
const WRITE_BUF_SIZE: usize = 256 * 1024;

/// Output container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkFormat {
    #[default]
    Zstd,
    Gzip,
    Plain,
}

impl SinkFormat {
    /// Parse CLI/config string into enum
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "zstd" | "zst" => Some(Self::Zstd),
            "gzip" | "gz" => Some(Self::Gzip),
            "plain" | "ndjson" | "none" => Some(Self::Plain),
            _ => None,
        }
    }

    /// File extension including the ndjson part
    pub fn extension(self) -> &'static str {
        match self {
            Self::Zstd => "ndjson.zst",
            Self::Gzip => "ndjson.gz",
            Self::Plain => "ndjson",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Zstd => "zstd",
            Self::Gzip => "gzip",
            Self::Plain => "plain",
        }
    }
}

impl std::fmt::Display for SinkFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One open compression frame
enum Frame {
    Zstd(zstd::Encoder<'static, BufWriter<File>>),
    Gzip(GzEncoder<BufWriter<File>>),
    Plain(BufWriter<File>),
}

impl Frame {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Zstd(w) => w,
            Self::Gzip(w) => w,
            Self::Plain(w) => w,
        }
    }

    /// Write the frame trailer and hand back the file
    fn finish(self) -> io::Result<File> {
        let buffered = match self {
            Self::Zstd(w) => w.finish()?,
            Self::Gzip(w) => w.finish()?,
            Self::Plain(w) => w,
        };
        buffered.into_inner().map_err(|e| e.into_error())
    }
}

enum State {
    /// Between frames
    Idle(File),
    Writing(Frame),
    /// A frame failed to finish; the file handle is gone
    Failed,
}

/// Append-only, frame-per-flush compressed record sink
pub struct CompressedSink {
    path: PathBuf,
    format: SinkFormat,
    level: i32,
    state: State,
    records: usize,
    pending: usize,
}

impl std::fmt::Debug for CompressedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedSink")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("records", &self.records)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl CompressedSink {
    /// Open `path` for appending, creating it and its parent directory if needed.
    pub fn create(path: &Path, format: SinkFormat, level: i32) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            format,
            level,
            state: State::Idle(file),
            records: 0,
            pending: 0,
        })
    }

    /// Serialize one record as a JSON line into the current frame.
    pub fn write(&mut self, record: &CanonicalRecord) -> io::Result<()> {
        let frame = self.frame()?;
        let w = frame.writer();
        serde_json::to_writer(&mut *w, record).map_err(io::Error::other)?;
        w.write_all(b"\n")?;
        self.records += 1;
        self.pending += 1;
        Ok(())
    }

    /// End the current frame and sync it to disk.
    ///
    /// After this returns, every record written so far is recoverable by an
    /// independent reader. No-op when nothing was written since the last flush.
    pub fn flush(&mut self) -> io::Result<()> {
        match std::mem::replace(&mut self.state, State::Failed) {
            State::Writing(frame) => {
                let file = frame.finish()?;
                file.sync_data()?;
                self.state = State::Idle(file);
                self.pending = 0;
                Ok(())
            }
            State::Idle(file) => {
                self.state = State::Idle(file);
                Ok(())
            }
            State::Failed => Err(failed()),
        }
    }

    /// Finalize the stream. Consumes the sink; returns total records written.
    pub fn close(mut self) -> io::Result<usize> {
        self.flush()?;
        Ok(self.records)
    }

    /// Records written through this sink (this run only)
    pub fn records(&self) -> usize {
        self.records
    }

    /// Records written since the last flush
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn frame(&mut self) -> io::Result<&mut Frame> {
        if let State::Idle(_) = self.state {
            let State::Idle(file) = std::mem::replace(&mut self.state, State::Failed) else {
                unreachable!()
            };
            let buffered = BufWriter::with_capacity(WRITE_BUF_SIZE, file);
            let frame = match self.format {
                SinkFormat::Zstd => Frame::Zstd(zstd::Encoder::new(buffered, self.level)?),
                SinkFormat::Gzip => {
                    let level = self.level.clamp(0, 9) as u32;
                    Frame::Gzip(GzEncoder::new(buffered, Compression::new(level)))
                }
                SinkFormat::Plain => Frame::Plain(buffered),
            };
            self.state = State::Writing(frame);
        }
        match &mut self.state {
            State::Writing(frame) => Ok(frame),
            _ => Err(failed()),
        }
    }
}

fn failed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "sink failed to finish a frame")
}

/// Decoding reader over a sink file (all frames)
pub fn open_reader(path: &Path, format: SinkFormat) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    Ok(match format {
        SinkFormat::Zstd => Box::new(BufReader::new(zstd::Decoder::new(file)?)),
        SinkFormat::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(file))),
        SinkFormat::Plain => Box::new(BufReader::new(file)),
    })
}

/// Read back every complete record from a sink file.
///
/// Stops at the first decode error (an unfinished trailing frame left by a
/// crash) and returns what was recovered up to that point.
pub fn recover_records(path: &Path, format: SinkFormat) -> io::Result<Vec<CanonicalRecord>> {
    let reader = open_reader(path, format)?;
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                log::warn!("{}: stopped at truncated tail: {e}", path.display());
                break;
            }
        };
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(rec) => records.push(rec),
            Err(e) => {
                log::warn!("{}: skipping unparsable line: {e}", path.display());
            }
        }
    }
    Ok(records)
}
