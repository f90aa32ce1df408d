//! Centralized error types for threadstore.
//!
//! Protocol anomalies (duplicate delivery, unknown thread, stale draft) are
//! not errors: operations log them and return `Ok`. Everything that reaches
//! a [`StoreError`] is either a caller mistake or a storage failure, and
//! [`StoreError::is_fatal`] tells the two apart.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the threadstore library.
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A thread or draft file does not follow the on-disk layout.
    #[error("Corrupt thread file '{path}': {reason}")]
    CorruptThread { path: PathBuf, reason: String },

    /// JSON encoding or decoding of a header, index or CC block failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record header does not fit the 4-hex-digit length prefix.
    #[error("Record header too long: {0} bytes")]
    HeaderTooLong(usize),

    /// The incoming message stream ended before the declared body length.
    #[error("Message body truncated: expected {expected} bytes, got {got}")]
    ShortBody { expected: u64, got: u64 },

    /// Reading an incoming message or writing to a client failed.
    #[error("Message stream error: {0}")]
    Stream(std::io::Error),

    /// Declared attachment sizes add up to more than the message length.
    #[error("Attachment sizes total {declared} bytes, exceeding message length {total}")]
    AttachmentOverflow { declared: u64, total: u64 },

    /// An id contains characters that cannot be stored in a pending filename.
    #[error("Invalid id '{0}'")]
    InvalidId(String),

    /// The thread id was retired when its draft thread was promoted.
    #[error("Thread name changed: {0}")]
    ThreadRenamed(String),

    /// A draft starting a new thread has no subject.
    #[error("Subject missing")]
    SubjectMissing,

    /// Forwarding applies to sent threads only.
    #[error("Cannot forward draft thread {0}")]
    ForwardDraftThread(String),

    /// A collaborator rejected a draft's attachments.
    #[error("Attachment error: {0}")]
    Attachment(String),

    /// A transaction changed the thread directory but did not finish. Its
    /// staged file is left for recovery.
    #[error("Transaction {txn} applied partially: {source}")]
    ApplyFailed {
        txn: String,
        source: Box<StoreError>,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, StoreError>`.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap an error raised after a transaction reached the thread directory.
    pub fn apply_failed(txn: impl ToString, source: StoreError) -> Self {
        Self::ApplyFailed {
            txn: txn.to_string(),
            source: Box::new(source),
        }
    }

    /// Create a `CorruptThread` variant.
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptThread {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the process should stop rather than continue.
    ///
    /// Storage failures leave at most a staged transaction behind, which the
    /// recovery pass at the next start completes. Continuing past them could
    /// let the index diverge from the record bytes.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::CorruptThread { .. } | Self::Json(_) | Self::ApplyFailed { .. }
        )
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `StoreError::io`).
impl From<std::io::Error> for StoreError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
