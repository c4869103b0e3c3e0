//! Storage configuration.
//!
//! Supports:
//! - Embedding in a host CLI via `#[command(flatten)]`
//! - Environment variable overrides
//! - Sensible defaults (`batch` / `message` tables)

use clap::Args;
use std::path::PathBuf;

/// Default name of the batch table.
pub const DEFAULT_BATCH_TABLE: &str = "batch";

/// Default name of the message table.
pub const DEFAULT_MESSAGE_TABLE: &str = "message";

/// Configuration for a batch/message store.
///
/// Passed explicitly at construction; nothing here is global.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[arg(long = "db-path", env = "BATCHLOG_DB_PATH", default_value = "./data/batchlog.db")]
    pub db_path: PathBuf,

    /// Name of the batch table
    #[arg(long, env = "BATCHLOG_BATCH_TABLE", default_value = DEFAULT_BATCH_TABLE)]
    pub batch_table: String,

    /// Name of the message table
    #[arg(long, env = "BATCHLOG_MESSAGE_TABLE", default_value = DEFAULT_MESSAGE_TABLE)]
    pub message_table: String,

    /// Size of the writer command channel (backpressure control)
    #[arg(long, env = "BATCHLOG_WRITE_CHANNEL_SIZE", default_value_t = 1000)]
    pub write_channel_size: usize,
}

impl StorageConfig {
    /// Use custom table names, keeping the other defaults.
    pub fn with_tables(batch_table: impl Into<String>, message_table: impl Into<String>) -> Self {
        Self {
            batch_table: batch_table.into(),
            message_table: message_table.into(),
            ..Self::default()
        }
    }

    /// Create a configuration pointing at a specific database file.
    pub fn at_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/batchlog.db"),
            batch_table: DEFAULT_BATCH_TABLE.into(),
            message_table: DEFAULT_MESSAGE_TABLE.into(),
            write_channel_size: 1000,
        }
    }
}
