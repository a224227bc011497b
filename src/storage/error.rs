//! Repository errors

use std::fmt;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug)]
pub enum StorageError {
    /// The database could not be opened
    ConnectionFailed(String),

    QueryFailed(String),

    Migration(String),

    /// A stored row or monitor definition does not decode
    Decode(String),

    /// Temporarily unable to serve requests (pool exhausted or closed, I/O,
    /// repository offline); callers may retry later
    Unavailable(String),
}

impl StorageError {
    /// Whether retrying the same operation later can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, msg) = match self {
            StorageError::ConnectionFailed(msg) => ("cannot open repository", msg),
            StorageError::QueryFailed(msg) => ("repository query failed", msg),
            StorageError::Migration(msg) => ("schema migration failed", msg),
            StorageError::Decode(msg) => ("undecodable stored data", msg),
            StorageError::Unavailable(msg) => ("repository unavailable", msg),
        };
        write!(f, "{}: {}", kind, msg)
    }
}

impl std::error::Error for StorageError {}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Decode(err.to_string())
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StorageError::Unavailable(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StorageError::Decode(err.to_string())
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::Migration(err.to_string())
    }
}
