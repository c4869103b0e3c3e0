//! Shared fixtures for Batchlog integration tests.
//!
//! Provides:
//! - Temporary database directories
//! - Writer setup against a file-backed database

#![allow(dead_code)]

use batchlog::{StorageConfig, StorageHandle, Writer};
use std::path::PathBuf;
use tempfile::TempDir;

/// Test fixture that manages a temporary database directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    /// Temporary directory for test database
    pub temp_dir: TempDir,
    /// Path to the database file
    pub db_path: PathBuf,
}

impl TestFixture {
    /// Create a new test fixture with a temporary database directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        Self { temp_dir, db_path }
    }

    /// Configuration pointing at this fixture's database.
    pub fn config(&self) -> StorageConfig {
        StorageConfig {
            write_channel_size: 64,
            ..StorageConfig::at_path(&self.db_path)
        }
    }

    /// Spawn a writer over this fixture's database.
    pub fn writer(&self) -> (Writer, StorageHandle) {
        batchlog::observability::tracing::init_test_tracing();
        let writer = Writer::open(&self.config()).expect("failed to open writer");
        let handle = writer.handle();
        (writer, handle)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Stop a writer and wait for its thread.
pub async fn stop(writer: Writer, handle: StorageHandle) {
    handle.shutdown().await.expect("shutdown failed");
    writer.join().expect("writer thread panicked");
}
