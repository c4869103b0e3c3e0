//! Batchlog: SQLite persistence for asynchronous batch jobs and their messages.
//!
//! Batchlog tracks the lifecycle of queued batch-inference jobs ("batches")
//! and the units of work they contain ("messages"): status transitions,
//! token-usage accounting, and randomized sampling of batches for worker pickup.
//!
//! # Architecture
//!
//! - **Idempotent writes**: creates are `INSERT OR IGNORE`, updates never create
//! - **Sparse updates**: absent message fields keep their stored value
//! - **Unbiased sampling**: `ORDER BY RANDOM()` spreads workers across eligible batches
//! - **Single writer**: one thread owns the connection, callers hold an async handle
//!
//! # Modules
//!
//! - [`config`]: Table names and writer settings
//! - [`observability`]: Metrics and tracing setup
//! - [`storage`]: Schema, facade, and writer thread

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // storage::error::StorageError is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes  // r#""# is fine for SQL
)]

pub mod config;
pub mod observability;
pub mod storage;

pub use config::StorageConfig;
pub use storage::{
    Batch, Message, MessagePatch, NewMessage, Storage, StorageError, StorageHandle, Writer,
};

use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable) identifier for a batch or message.
///
/// Storage treats ids as opaque strings; this is a convenience for callers
/// that do not already have ids from an upstream API.
///
/// # Example
///
/// ```
/// let id = batchlog::generate_id();
/// assert!(id.len() == 36); // UUID string format
/// ```
#[must_use]
pub fn generate_id() -> String {
    Uuid::now_v7().to_string()
}
