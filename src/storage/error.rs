//! Errors raised by the sensor store

use std::fmt;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug)]
pub enum StorageError {
    /// The database file could not be opened or the pool could not be created
    Open(String),

    /// A statement against `sensor_data` or `alerts` failed
    Query(String),

    /// Schema migrations could not be applied at startup
    Migration(String),

    /// A stored row holds a value that does not fit its Rust type, e.g. an
    /// unknown severity or an out of range timestamp
    Decode(String),

    Io(std::io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Open(msg) => write!(f, "cannot open sensor database: {msg}"),
            StorageError::Query(msg) => write!(f, "sensor database statement failed: {msg}"),
            StorageError::Migration(msg) => write!(f, "cannot apply sensor schema: {msg}"),
            StorageError::Decode(msg) => write!(f, "corrupt row in sensor database: {msg}"),
            StorageError::Io(err) => write!(f, "sensor database file error: {err}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::Io(io_err),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => StorageError::Open(err.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
                StorageError::Decode(err.to_string())
            }
            _ => StorageError::Query(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::Migration(err.to_string())
    }
}
