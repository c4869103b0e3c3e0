//! SQLite storage layer for batches and messages.
//!
//! Provides:
//! - Idempotent schema bootstrap with configurable table names
//! - The synchronous [`Storage`] facade
//! - A dedicated writer thread with an async [`StorageHandle`]

pub mod error;
pub mod model;
pub mod schema;
pub mod store;
pub mod writer;

pub use error::StorageError;
pub use model::{Batch, Message, MessagePatch, NewMessage};
pub use schema::TableNames;
pub use store::Storage;
pub use writer::{StorageHandle, Writer};
