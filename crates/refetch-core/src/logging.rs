//! Logging: global `log` setup with indicatif integration, plus per-shard log files.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use indicatif::MultiProgress;

/// ANSI color code and padded label for a log level.
fn level_style(level: log::Level, color: bool) -> (&'static str, &'static str, &'static str) {
    let label = match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    };
    if !color {
        return ("", label, "");
    }
    let ansi = match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    };
    (ansi, label, "\x1b[0m")
}

/// Logger that prints through indicatif MultiProgress to avoid mixing with progress bars.
pub struct IndicatifLogger {
    inner: env_logger::Logger,
    multi: MultiProgress,
}

impl IndicatifLogger {
    pub fn new(inner: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { inner, multi }
    }
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.inner.enabled(record.metadata()) {
            let (pre, label, post) = level_style(record.level(), true);
            let line = format!("[{pre}{label}{post}] {}", record.args());
            self.multi.suspend(|| eprintln!("{line}"));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Initialize logging with optional TTY mode (indicatif integration)
pub fn init_logging(quiet: bool, debug: bool, multi: Option<&MultiProgress>) {
    let default_level = if debug {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let env = env_logger::Env::default().default_filter_or(default_level);

    if let Some(multi) = multi {
        let logger = env_logger::Builder::from_env(env).build();
        let max_level = logger.filter();
        if log::set_boxed_logger(Box::new(IndicatifLogger::new(logger, multi.clone()))).is_ok() {
            log::set_max_level(max_level);
        }
    } else {
        // Non-TTY: no ANSI colors, timestamp for log aggregation
        let _ = env_logger::Builder::from_env(env)
            .format(|buf, record| {
                let (_, label, _) = level_style(record.level(), false);
                writeln!(buf, "{} [{label}] {}", buf.timestamp_seconds(), record.args())
            })
            .try_init();
    }
}

/// Move `path` to `path.old`, replacing any previous `.old` file.
pub fn rotate_log(path: &Path) -> io::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let mut old = path.as_os_str().to_owned();
    old.push(".old");
    let old = PathBuf::from(old);
    if old.exists() {
        fs::remove_file(&old)?;
    }
    fs::rename(path, old)
}

/// Per-shard log stream.
///
/// Every message goes to the global `log` facade prefixed with the shard label.
/// When file-backed, all levels are also written to the shard's log file and
/// errors additionally to a separate error-only file.
pub struct ShardLog {
    label: String,
    files: Option<Mutex<LogFiles>>,
}

struct LogFiles {
    all: BufWriter<File>,
    errors: BufWriter<File>,
}

impl fmt::Debug for ShardLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardLog")
            .field("label", &self.label)
            .field("file_backed", &self.files.is_some())
            .finish()
    }
}

impl ShardLog {
    /// Log only through the global facade (tests, dry runs)
    pub fn console(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            files: None,
        }
    }

    /// Open `log_path` and `error_path`, rotating previous runs' files to `.old`
    pub fn open(label: impl Into<String>, log_path: &Path, error_path: &Path) -> io::Result<Self> {
        for path in [log_path, error_path] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            rotate_log(path)?;
        }
        let open = |p: &Path| -> io::Result<BufWriter<File>> {
            Ok(BufWriter::new(
                OpenOptions::new().create(true).append(true).open(p)?,
            ))
        };
        Ok(Self {
            label: label.into(),
            files: Some(Mutex::new(LogFiles {
                all: open(log_path)?,
                errors: open(error_path)?,
            })),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn debug(&self, msg: impl fmt::Display) {
        log::debug!("{}: {msg}", self.label);
        self.write(log::Level::Debug, &msg);
    }

    pub fn info(&self, msg: impl fmt::Display) {
        log::info!("{}: {msg}", self.label);
        self.write(log::Level::Info, &msg);
    }

    pub fn warn(&self, msg: impl fmt::Display) {
        log::warn!("{}: {msg}", self.label);
        self.write(log::Level::Warn, &msg);
    }

    pub fn error(&self, msg: impl fmt::Display) {
        log::error!("{}: {msg}", self.label);
        self.write(log::Level::Error, &msg);
    }

    /// Flush buffered file output
    pub fn flush(&self) {
        if let Some(files) = &self.files {
            let mut files = files.lock().unwrap_or_else(|e| e.into_inner());
            let _ = files.all.flush();
            let _ = files.errors.flush();
        }
    }

    fn write(&self, level: log::Level, msg: &dyn fmt::Display) {
        let Some(files) = &self.files else {
            return;
        };
        let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let (_, label, _) = level_style(level, false);
        let label = label.trim_end();
        let mut files = files.lock().unwrap_or_else(|e| e.into_inner());
        // Log file write failures must never abort a shard
        let _ = writeln!(files.all, "{ts} - {} - {label} - {msg}", self.label);
        if level == log::Level::Error {
            let _ = writeln!(files.errors, "{ts} - {label} - {msg}");
            let _ = files.errors.flush();
        }
    }
}

impl Drop for ShardLog {
    fn drop(&mut self) {
        self.flush();
    }
}
