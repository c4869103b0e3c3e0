//! Error taxonomy for storage operations.
//!
//! Duplicate creates and updates of unknown ids are not errors; they
//! complete successfully and report that no row was affected.

use thiserror::Error;

/// Error type for storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A message referenced a batch that was never created.
    #[error("message {message_id} references unknown batch {batch_id}")]
    ReferentialIntegrity { message_id: String, batch_id: String },

    /// Any other failure reported by SQLite.
    #[error("Database error: {0}")]
    Unavailable(#[from] rusqlite::Error),

    #[error("Failed to create database directory {}: {source}", .path.display())]
    CreateDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid table name: {0:?}")]
    InvalidTableName(String),

    #[error("{field} value {value} exceeds the storable range")]
    TokenOverflow { field: &'static str, value: u64 },

    #[error("Failed to spawn writer thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Writer channel closed")]
    ChannelClosed,

    #[error("Writer thread panicked")]
    ThreadPanic,
}

impl StorageError {
    /// Whether this error came from the store rather than from input validation
    /// or the writer lifecycle.
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::ReferentialIntegrity { .. } | Self::Unavailable(_))
    }
}

/// Whether a rusqlite error is a foreign-key constraint violation.
pub(crate) fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}
