//! Error types for shard runs and remote fetches

use std::path::PathBuf;

/// Error that ends a single shard run.
///
/// Only setup failures and checkpoint write failures reach this type; every
/// remote or record-level failure is absorbed at the batch boundary.
#[derive(Debug)]
pub enum ShardError {
    /// Shard identifier file cannot be read
    Shard { path: PathBuf, source: std::io::Error },
    /// Output sink cannot be opened or written
    Output { path: PathBuf, source: std::io::Error },
    /// Checkpoint log cannot be read or appended
    Checkpoint { path: PathBuf, source: std::io::Error },
    /// Remote client could not be constructed for this shard
    Client(String),
}

impl std::fmt::Display for ShardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shard { path, source } => write!(f, "shard {}: {source}", path.display()),
            Self::Output { path, source } => write!(f, "output {}: {source}", path.display()),
            Self::Checkpoint { path, source } => {
                write!(f, "checkpoint {}: {source}", path.display())
            }
            Self::Client(msg) => write!(f, "client: {msg}"),
        }
    }
}

impl std::error::Error for ShardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Shard { source, .. }
            | Self::Output { source, .. }
            | Self::Checkpoint { source, .. } => Some(source),
            Self::Client(_) => None,
        }
    }
}

/// Substrings that mark an error message as a connectivity failure.
const TRANSIENT_PATTERNS: &[&str] = &[
    "Cannot connect to host",
    "Connect call failed",
    "connection refused",
    "connection reset",
    "timed out",
    "dns error",
];

/// Error surfaced by a [`RecordClient`](crate::client::RecordClient) stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Remote temporarily unreachable (connect failure, timeout). Aborts the batch.
    Transient(String),
    /// One record could not be produced. The batch continues.
    Record { id: String, message: String },
    /// Any other remote failure. Aborts the batch.
    Api {
        status: Option<u16>,
        message: String,
    },
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(msg) => write!(f, "connection error: {msg}"),
            Self::Record { id, message } => write!(f, "record {id}: {message}"),
            Self::Api {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Api {
                status: None,
                message,
            } => write!(f, "API error: {message}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    /// Classify a bare error message, e.g. from a lower-level transport.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if TRANSIENT_PATTERNS
            .iter()
            .any(|p| lower.contains(&p.to_lowercase()))
        {
            Self::Transient(message)
        } else {
            Self::Api {
                status: None,
                message,
            }
        }
    }

    /// Classify a reqwest error. Connect failures and timeouts are transient.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        let transient = e.is_connect() || e.is_timeout();
        let status = e.status().map(|s| s.as_u16());
        // Strip URL to avoid leaking request parameters into logs
        let message = e.without_url().to_string();
        if transient {
            Self::Transient(message)
        } else {
            Self::Api { status, message }
        }
    }

    /// Whether the remote was unreachable rather than answering with an error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether the error only concerns one record and the batch can continue.
    pub fn is_record_level(&self) -> bool {
        matches!(self, Self::Record { .. })
    }

    /// Whether a retry of the same request may succeed (429 / 5xx / transient).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Api { status, .. } => matches!(status, Some(429) | Some(500..=599)),
            Self::Record { .. } => false,
        }
    }
}
