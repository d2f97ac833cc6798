// src/error/mod.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SentryError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("crash event {0} not found")]
    NotFound(String),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl SentryError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        SentryError::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors the surrounding loop is expected to absorb (a bad log line, a
    /// PID that exited mid-scan) as opposed to operator mistakes.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SentryError::Config(_))
    }
}

impl From<redb::Error> for SentryError {
    fn from(e: redb::Error) -> Self {
        SentryError::Storage(e.to_string())
    }
}

impl From<redb::DatabaseError> for SentryError {
    fn from(e: redb::DatabaseError) -> Self {
        SentryError::Storage(e.to_string())
    }
}

impl From<redb::TransactionError> for SentryError {
    fn from(e: redb::TransactionError) -> Self {
        SentryError::Storage(e.to_string())
    }
}

impl From<redb::TableError> for SentryError {
    fn from(e: redb::TableError) -> Self {
        SentryError::Storage(e.to_string())
    }
}

impl From<redb::StorageError> for SentryError {
    fn from(e: redb::StorageError) -> Self {
        SentryError::Storage(e.to_string())
    }
}

impl From<redb::CommitError> for SentryError {
    fn from(e: redb::CommitError) -> Self {
        SentryError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SentryError>;
