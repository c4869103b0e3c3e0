//! Row and patch types for batches and messages.

use serde::{Deserialize, Serialize};

use super::error::StorageError;

/// A stored batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub status: String,
}

/// A stored message with its token accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub batch_id: String,
    pub status: String,
    pub content: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
    pub error: Option<String>,
}

impl Message {
    /// Decode the stored content as JSON.
    pub fn content_json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.content)
    }
}

/// Input for creating a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub id: String,
    pub batch_id: String,
    pub status: String,
    pub content: String,
}

impl NewMessage {
    pub fn new(
        id: impl Into<String>,
        batch_id: impl Into<String>,
        status: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            batch_id: batch_id.into(),
            status: status.into(),
            content: content.into(),
        }
    }

    /// Build a message whose content is the JSON encoding of `payload`.
    pub fn from_json<T: Serialize>(
        id: impl Into<String>,
        batch_id: impl Into<String>,
        status: impl Into<String>,
        payload: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self::new(id, batch_id, status, serde_json::to_string(payload)?))
    }
}

/// Sparse update for a message.
///
/// Each `None` field leaves the stored column untouched; each `Some`
/// overwrites it. Status is passed separately and always overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePatch {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
    pub error: Option<String>,
}

impl MessagePatch {
    /// A patch that changes nothing but status.
    pub fn status_only() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn input_tokens(mut self, n: u64) -> Self {
        self.input_tokens = Some(n);
        self
    }

    #[must_use]
    pub fn output_tokens(mut self, n: u64) -> Self {
        self.output_tokens = Some(n);
        self
    }

    #[must_use]
    pub fn cache_creation_input_tokens(mut self, n: u64) -> Self {
        self.cache_creation_input_tokens = Some(n);
        self
    }

    #[must_use]
    pub fn cache_read_input_tokens(mut self, n: u64) -> Self {
        self.cache_read_input_tokens = Some(n);
        self
    }

    #[must_use]
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Whether the patch carries no field updates.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Token counters converted to SQLite integers, in column order:
    /// input, output, cache creation, cache read.
    pub(crate) fn token_params(&self) -> Result<[Option<i64>; 4], StorageError> {
        Ok([
            to_sql_count("input_tokens", self.input_tokens)?,
            to_sql_count("output_tokens", self.output_tokens)?,
            to_sql_count(
                "cache_creation_input_tokens",
                self.cache_creation_input_tokens,
            )?,
            to_sql_count("cache_read_input_tokens", self.cache_read_input_tokens)?,
        ])
    }
}

fn to_sql_count(field: &'static str, value: Option<u64>) -> Result<Option<i64>, StorageError> {
    value
        .map(|v| i64::try_from(v).map_err(|_| StorageError::TokenOverflow { field, value: v }))
        .transpose()
}

/// Read back a counter column. Negative values cannot be written through
/// this crate; any written by other tools read as absent.
pub(crate) fn from_sql_count(value: Option<i64>) -> Option<u64> {
    value.and_then(|v| u64::try_from(v).ok())
}
