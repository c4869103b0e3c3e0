//! Synchronous storage facade over a SQLite connection.
//!
//! Each operation is a single statement, so it is atomic on its own; no
//! transaction spans more than one call.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::error::{is_foreign_key_violation, StorageError};
use super::model::{from_sql_count, Batch, Message, MessagePatch, NewMessage};
use super::schema::{
    apply_file_pragmas, apply_pragmas, initialize_schema, quote_identifier, TableNames,
};
use crate::config::StorageConfig;
use crate::observability::metrics::{record_sample, record_write, Entity};

/// SQL for every operation, rendered once for the configured table names.
#[derive(Debug)]
struct Statements {
    create_batch: String,
    update_batch: String,
    transition_batch: String,
    random_batches: String,
    get_batch: String,
    count_batches: String,
    create_message: String,
    update_message: String,
    get_message: String,
    batch_messages: String,
}

const MESSAGE_COLUMNS: &str = "id, batch_id, status, content, input_tokens, output_tokens, \
     cache_creation_input_tokens, cache_read_input_tokens, error";

impl Statements {
    fn new(tables: &TableNames) -> Self {
        let batch = quote_identifier(tables.batch());
        let message = quote_identifier(tables.message());
        Self {
            create_batch: format!("INSERT OR IGNORE INTO {batch} (id, status) VALUES (?1, ?2)"),
            update_batch: format!("UPDATE {batch} SET status = ?2 WHERE id = ?1"),
            transition_batch: format!(
                "UPDATE {batch} SET status = ?3 WHERE id = ?1 AND status = ?2"
            ),
            random_batches: format!(
                "SELECT id FROM {batch} WHERE status = ?1 ORDER BY RANDOM() LIMIT ?2"
            ),
            get_batch: format!("SELECT id, status FROM {batch} WHERE id = ?1"),
            count_batches: format!("SELECT COUNT(*) FROM {batch} WHERE status = ?1"),
            create_message: format!(
                "INSERT OR IGNORE INTO {message} (id, batch_id, status, content) \
                 VALUES (?1, ?2, ?3, ?4)"
            ),
            update_message: format!(
                r#"UPDATE {message}
                SET status = ?2,
                    input_tokens = COALESCE(?3, input_tokens),
                    output_tokens = COALESCE(?4, output_tokens),
                    cache_creation_input_tokens = COALESCE(?5, cache_creation_input_tokens),
                    cache_read_input_tokens = COALESCE(?6, cache_read_input_tokens),
                    error = COALESCE(?7, error)
                WHERE id = ?1"#
            ),
            get_message: format!("SELECT {MESSAGE_COLUMNS} FROM {message} WHERE id = ?1"),
            batch_messages: format!(
                "SELECT {MESSAGE_COLUMNS} FROM {message} WHERE batch_id = ?1 ORDER BY id"
            ),
        }
    }
}

/// Batch and message lifecycle storage.
///
/// Owns one SQLite connection. `rusqlite::Connection` is `Send` but not
/// `Sync`, so concurrent callers go through [`super::writer::Writer`].
#[derive(Debug)]
pub struct Storage {
    conn: Connection,
    tables: TableNames,
    sql: Statements,
}

impl Storage {
    /// Wrap an already-open connection and bootstrap the schema.
    pub fn new(conn: Connection, config: &StorageConfig) -> Result<Self, StorageError> {
        let tables = TableNames::from_config(config)?;
        apply_pragmas(&conn)?;
        Self::bootstrap(conn, tables)
    }

    /// Open (or create) the database file named by `config.db_path`.
    ///
    /// Missing parent directories are created first.
    pub fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        let tables = TableNames::from_config(config)?;
        if let Some(dir) = config.db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| StorageError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(&config.db_path)?;
        apply_file_pragmas(&conn)?;
        tracing::info!(path = %config.db_path.display(), "Opened database");
        Self::bootstrap(conn, tables)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(config: &StorageConfig) -> Result<Self, StorageError> {
        Self::new(Connection::open_in_memory()?, config)
    }

    fn bootstrap(conn: Connection, tables: TableNames) -> Result<Self, StorageError> {
        initialize_schema(&conn, &tables)?;
        let sql = Statements::new(&tables);
        Ok(Self { conn, tables, sql })
    }

    /// The underlying connection, for queries this facade does not expose.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Insert a batch. A batch that already exists keeps its status.
    ///
    /// Returns `true` if a row was inserted.
    #[tracing::instrument(skip(self))]
    pub fn create_batch(&self, id: &str, status: &str) -> Result<bool, StorageError> {
        let changed = self
            .conn
            .prepare_cached(&self.sql.create_batch)?
            .execute(params![id, status])?;
        let applied = changed > 0;
        if !applied {
            tracing::debug!("Batch already exists");
        }
        record_write(Entity::Batch, "create", applied);
        Ok(applied)
    }

    /// Overwrite a batch's status. Unknown ids are left alone.
    ///
    /// Returns `true` if a row was updated.
    #[tracing::instrument(skip(self))]
    pub fn update_batch(&self, id: &str, status: &str) -> Result<bool, StorageError> {
        let changed = self
            .conn
            .prepare_cached(&self.sql.update_batch)?
            .execute(params![id, status])?;
        let applied = changed > 0;
        if !applied {
            tracing::debug!("Update of unknown batch ignored");
        }
        record_write(Entity::Batch, "update", applied);
        Ok(applied)
    }

    /// Move a batch from `from` to `to` only if it is currently in `from`.
    ///
    /// Of several workers racing to claim the same candidate, exactly one
    /// sees `true`.
    #[tracing::instrument(skip(self))]
    pub fn transition_batch(&self, id: &str, from: &str, to: &str) -> Result<bool, StorageError> {
        let changed = self
            .conn
            .prepare_cached(&self.sql.transition_batch)?
            .execute(params![id, from, to])?;
        let applied = changed > 0;
        record_write(Entity::Batch, "transition", applied);
        Ok(applied)
    }

    /// Up to `limit` ids of batches in `status`, in random order.
    ///
    /// The ids are candidates only; nothing is reserved for the caller.
    #[tracing::instrument(skip(self))]
    pub fn random_batches(&self, limit: usize, status: &str) -> Result<Vec<String>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare_cached(&self.sql.random_batches)?;
        let ids = stmt
            .query_map(params![status, limit], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        record_sample(status, ids.len());
        Ok(ids)
    }

    pub fn get_batch(&self, id: &str) -> Result<Option<Batch>, StorageError> {
        let batch = self
            .conn
            .prepare_cached(&self.sql.get_batch)?
            .query_row([id], |row| {
                Ok(Batch {
                    id: row.get(0)?,
                    status: row.get(1)?,
                })
            })
            .optional()?;
        Ok(batch)
    }

    /// Number of batches currently in `status`.
    pub fn count_batches(&self, status: &str) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .prepare_cached(&self.sql.count_batches)?
            .query_row([status], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Insert a message. A message that already exists is left unchanged.
    ///
    /// Fails with [`StorageError::ReferentialIntegrity`] if the batch does
    /// not exist. Returns `true` if a row was inserted.
    #[tracing::instrument(skip(self, message), fields(id = %message.id, batch_id = %message.batch_id))]
    pub fn create_message(&self, message: &NewMessage) -> Result<bool, StorageError> {
        let result = self
            .conn
            .prepare_cached(&self.sql.create_message)?
            .execute(params![
                message.id,
                message.batch_id,
                message.status,
                message.content
            ]);

        let changed = match result {
            Ok(changed) => changed,
            Err(e) if is_foreign_key_violation(&e) => {
                tracing::warn!("Message references unknown batch");
                return Err(StorageError::ReferentialIntegrity {
                    message_id: message.id.clone(),
                    batch_id: message.batch_id.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let applied = changed > 0;
        if !applied {
            tracing::debug!("Message already exists");
        }
        record_write(Entity::Message, "create", applied);
        Ok(applied)
    }

    /// Overwrite a message's status and merge in the fields `patch` carries.
    ///
    /// Fields absent from the patch keep their stored values. Unknown ids
    /// are left alone. Returns `true` if a row was updated.
    #[tracing::instrument(skip(self, patch))]
    pub fn update_message(
        &self,
        id: &str,
        status: &str,
        patch: &MessagePatch,
    ) -> Result<bool, StorageError> {
        let [input, output, cache_creation, cache_read] = patch.token_params()?;
        let changed = self
            .conn
            .prepare_cached(&self.sql.update_message)?
            .execute(params![
                id,
                status,
                input,
                output,
                cache_creation,
                cache_read,
                patch.error
            ])?;
        let applied = changed > 0;
        if !applied {
            tracing::debug!("Update of unknown message ignored");
        }
        record_write(Entity::Message, "update", applied);
        Ok(applied)
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>, StorageError> {
        let message = self
            .conn
            .prepare_cached(&self.sql.get_message)?
            .query_row([id], message_from_row)
            .optional()?;
        Ok(message)
    }

    /// All messages of a batch, ordered by id.
    pub fn batch_messages(&self, batch_id: &str) -> Result<Vec<Message>, StorageError> {
        let mut stmt = self.conn.prepare_cached(&self.sql.batch_messages)?;
        let messages = stmt
            .query_map([batch_id], message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        batch_id: row.get(1)?,
        status: row.get(2)?,
        content: row.get(3)?,
        input_tokens: from_sql_count(row.get(4)?),
        output_tokens: from_sql_count(row.get(5)?),
        cache_creation_input_tokens: from_sql_count(row.get(6)?),
        cache_read_input_tokens: from_sql_count(row.get(7)?),
        error: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn storage() -> Storage {
        Storage::open_in_memory(&StorageConfig::default()).unwrap()
    }

    #[test]
    fn test_create_batch_is_idempotent() {
        let s = storage();
        assert!(s.create_batch("b1", "pending").unwrap());
        assert!(!s.create_batch("b1", "completed").unwrap());

        assert_eq!(s.get_batch("b1").unwrap().unwrap().status, "pending");
    }

    #[test]
    fn test_update_batch_never_creates() {
        let s = storage();
        assert!(!s.update_batch("ghost", "running").unwrap());
        assert!(s.get_batch("ghost").unwrap().is_none());
    }

    #[test]
    fn test_update_batch_overwrites_any_status() {
        let s = storage();
        s.create_batch("b1", "completed").unwrap();
        assert!(s.update_batch("b1", "pending").unwrap());
        assert_eq!(s.get_batch("b1").unwrap().unwrap().status, "pending");
    }

    #[test]
    fn test_transition_batch_requires_expected_status() {
        let s = storage();
        s.create_batch("b1", "pending").unwrap();

        assert!(s.transition_batch("b1", "pending", "in_progress").unwrap());
        assert!(!s.transition_batch("b1", "pending", "in_progress").unwrap());
        assert!(!s.transition_batch("ghost", "pending", "in_progress").unwrap());
        assert_eq!(s.get_batch("b1").unwrap().unwrap().status, "in_progress");
    }

    #[test]
    fn test_random_batches_bounds() {
        let s = storage();
        for i in 0..5 {
            s.create_batch(&format!("p{i}"), "pending").unwrap();
        }
        s.create_batch("done", "completed").unwrap();

        let sample = s.random_batches(3, "pending").unwrap();
        assert_eq!(sample.len(), 3);
        assert!(sample.iter().all(|id| id.starts_with('p')));
        let unique: HashSet<_> = sample.iter().collect();
        assert_eq!(unique.len(), 3);

        assert_eq!(s.random_batches(10, "pending").unwrap().len(), 5);
        assert!(s.random_batches(10, "failed").unwrap().is_empty());
        assert!(s.random_batches(0, "pending").unwrap().is_empty());
        assert_eq!(s.count_batches("pending").unwrap(), 5);
    }

    #[test]
    fn test_random_batches_handles_huge_limit() {
        let s = storage();
        s.create_batch("b1", "pending").unwrap();
        assert_eq!(s.random_batches(usize::MAX, "pending").unwrap(), vec!["b1"]);
    }

    #[test]
    fn test_create_message_requires_batch() {
        let s = storage();
        let err = s
            .create_message(&NewMessage::new("m1", "nope", "queued", "{}"))
            .unwrap_err();
        match err {
            StorageError::ReferentialIntegrity {
                message_id,
                batch_id,
            } => {
                assert_eq!(message_id, "m1");
                assert_eq!(batch_id, "nope");
            }
            other => panic!("expected referential integrity error, got {other:?}"),
        }
        assert!(s.get_message("m1").unwrap().is_none());
    }

    #[test]
    fn test_create_message_is_idempotent() {
        let s = storage();
        s.create_batch("b1", "pending").unwrap();
        assert!(s
            .create_message(&NewMessage::new("m1", "b1", "queued", "first"))
            .unwrap());
        assert!(!s
            .create_message(&NewMessage::new("m1", "b1", "done", "second"))
            .unwrap());

        let m = s.get_message("m1").unwrap().unwrap();
        assert_eq!(m.status, "queued");
        assert_eq!(m.content, "first");
        assert_eq!(m.input_tokens, None);
        assert_eq!(m.error, None);
    }

    #[test]
    fn test_update_message_merges_sparse_fields() {
        let s = storage();
        s.create_batch("b1", "pending").unwrap();
        s.create_message(&NewMessage::new("m1", "b1", "queued", "{}"))
            .unwrap();

        s.update_message("m1", "running", &MessagePatch::default().input_tokens(10))
            .unwrap();
        s.update_message("m1", "done", &MessagePatch::default().output_tokens(5))
            .unwrap();
        let m = s.get_message("m1").unwrap().unwrap();
        assert_eq!(m.status, "done");
        assert_eq!(m.input_tokens, Some(10));
        assert_eq!(m.output_tokens, Some(5));

        s.update_message("m1", "done", &MessagePatch::status_only())
            .unwrap();
        let m = s.get_message("m1").unwrap().unwrap();
        assert_eq!(m.input_tokens, Some(10));
        assert_eq!(m.output_tokens, Some(5));
        assert_eq!(m.content, "{}");
    }

    #[test]
    fn test_update_message_records_cache_tokens_and_error() {
        let s = storage();
        s.create_batch("b1", "pending").unwrap();
        s.create_message(&NewMessage::new("m1", "b1", "queued", "{}"))
            .unwrap();

        let patch = MessagePatch::default()
            .cache_creation_input_tokens(100)
            .cache_read_input_tokens(42)
            .error(r#"{"type":"overloaded"}"#);
        assert!(s.update_message("m1", "failed", &patch).unwrap());

        let m = s.get_message("m1").unwrap().unwrap();
        assert_eq!(m.status, "failed");
        assert_eq!(m.cache_creation_input_tokens, Some(100));
        assert_eq!(m.cache_read_input_tokens, Some(42));
        assert_eq!(m.error.as_deref(), Some(r#"{"type":"overloaded"}"#));
    }

    #[test]
    fn test_update_message_never_creates() {
        let s = storage();
        assert!(!s
            .update_message("ghost", "done", &MessagePatch::default().input_tokens(1))
            .unwrap());
        assert!(s.get_message("ghost").unwrap().is_none());
    }

    #[test]
    fn test_update_message_rejects_overflow_before_writing() {
        let s = storage();
        s.create_batch("b1", "pending").unwrap();
        s.create_message(&NewMessage::new("m1", "b1", "queued", "{}"))
            .unwrap();

        let patch = MessagePatch::default().input_tokens(u64::MAX);
        assert!(matches!(
            s.update_message("m1", "done", &patch),
            Err(StorageError::TokenOverflow { .. })
        ));
        assert_eq!(s.get_message("m1").unwrap().unwrap().status, "queued");
    }

    #[test]
    fn test_batch_messages_lists_only_that_batch() {
        let s = storage();
        s.create_batch("b1", "pending").unwrap();
        s.create_batch("b2", "pending").unwrap();
        s.create_message(&NewMessage::new("m2", "b1", "queued", "x"))
            .unwrap();
        s.create_message(&NewMessage::new("m1", "b1", "queued", "y"))
            .unwrap();
        s.create_message(&NewMessage::new("m3", "b2", "queued", "z"))
            .unwrap();

        let ids: Vec<_> = s
            .batch_messages("b1")
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert!(s.batch_messages("b3").unwrap().is_empty());
    }

    #[test]
    fn test_custom_table_names() {
        let config = StorageConfig::with_tables("jobs", "units");
        let s = Storage::open_in_memory(&config).unwrap();
        s.create_batch("b1", "pending").unwrap();

        let count: i64 = s
            .connection()
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(s.tables().message(), "units");
    }

    #[test]
    fn test_keyword_table_names_work_end_to_end() {
        let config = StorageConfig::with_tables("order", "select");
        let s = Storage::open_in_memory(&config).unwrap();

        assert!(s.create_batch("b1", "pending").unwrap());
        assert!(s.update_batch("b1", "running").unwrap());
        assert!(s.transition_batch("b1", "running", "done").unwrap());
        assert_eq!(s.count_batches("done").unwrap(), 1);
        assert_eq!(s.random_batches(5, "done").unwrap(), vec!["b1"]);

        assert!(s
            .create_message(&NewMessage::new("m1", "b1", "queued", "{}"))
            .unwrap());
        assert!(s
            .update_message("m1", "done", &MessagePatch::default().input_tokens(4))
            .unwrap());
        assert_eq!(s.get_message("m1").unwrap().unwrap().input_tokens, Some(4));
        assert_eq!(s.batch_messages("b1").unwrap().len(), 1);
        assert!(matches!(
            s.create_message(&NewMessage::new("m2", "ghost", "queued", "{}")),
            Err(StorageError::ReferentialIntegrity { .. })
        ));
    }

    #[test]
    fn test_open_creates_missing_parent_directories() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("data").join("nested").join("batchlog.db");

        let s = Storage::open(&StorageConfig::at_path(&db_path)).unwrap();
        s.create_batch("b1", "pending").unwrap();

        assert!(db_path.exists());
    }

    #[test]
    fn test_open_reports_unusable_parent() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = Storage::open(&StorageConfig::at_path(blocker.join("batchlog.db"))).unwrap_err();
        match err {
            StorageError::CreateDir { path, .. } => assert_eq!(path, blocker),
            other => panic!("expected directory error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_table_name_rejected() {
        let config = StorageConfig::with_tables("batch", "drop table");
        assert!(matches!(
            Storage::open_in_memory(&config),
            Err(StorageError::InvalidTableName(_))
        ));
    }
}
