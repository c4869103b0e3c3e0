//! Schema bootstrap and connection pragmas.
//!
//! Every statement is `IF NOT EXISTS`, so bootstrapping an already
//! provisioned database is a no-op. Table names are configurable and get
//! interpolated into SQL, so they are validated before use and always
//! quoted, which also lets keywords such as `order` serve as names.

use rusqlite::Connection;
use std::time::Duration;

use super::error::StorageError;
use crate::config::StorageConfig;

/// Longest accepted table name.
const MAX_TABLE_NAME_LEN: usize = 64;

/// How long a statement waits on a lock held by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Validated batch and message table names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    batch: String,
    message: String,
}

impl TableNames {
    pub fn new(batch: &str, message: &str) -> Result<Self, StorageError> {
        validate_table_name(batch)?;
        validate_table_name(message)?;
        if batch.eq_ignore_ascii_case(message) {
            return Err(StorageError::InvalidTableName(message.to_string()));
        }
        Ok(Self {
            batch: batch.to_string(),
            message: message.to_string(),
        })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        Self::new(&config.batch_table, &config.message_table)
    }

    pub fn batch(&self) -> &str {
        &self.batch
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

fn validate_table_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_TABLE_NAME_LEN
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.to_ascii_lowercase().starts_with("sqlite_");
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidTableName(name.to_string()))
    }
}

/// Quote a validated table name for use in SQL.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{name}\"")
}

/// Apply pragmas every connection needs.
///
/// Foreign keys are off by default in SQLite and must be enabled per
/// connection for message inserts to be checked against the batch table.
pub fn apply_pragmas(conn: &Connection) -> Result<(), StorageError> {
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}

/// Apply pragmas for a file-backed database.
///
/// WAL lets readers in other processes proceed while the writer commits.
pub fn apply_file_pragmas(conn: &Connection) -> Result<(), StorageError> {
    apply_pragmas(conn)?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    tracing::debug!(journal_mode = %mode, "Journal mode set");
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

/// Create both tables and their indexes if they do not exist.
pub fn initialize_schema(conn: &Connection, tables: &TableNames) -> Result<(), StorageError> {
    let batch = tables.batch();
    let message = tables.message();

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS "{batch}" (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS "{batch}_status_idx" ON "{batch}"(status);

        CREATE TABLE IF NOT EXISTS "{message}" (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            status TEXT NOT NULL,
            content TEXT NOT NULL,
            input_tokens INTEGER,
            output_tokens INTEGER,
            cache_creation_input_tokens INTEGER,
            cache_read_input_tokens INTEGER,
            error TEXT,
            FOREIGN KEY(batch_id) REFERENCES "{batch}"(id)
        );

        CREATE INDEX IF NOT EXISTS "{message}_batch_id_idx" ON "{message}"(batch_id);
        CREATE INDEX IF NOT EXISTS "{message}_status_idx" ON "{message}"(status);
        "#
    ))?;
    tx.commit()?;

    tracing::info!(batch_table = batch, message_table = message, "Schema initialized");
    Ok(())
}
