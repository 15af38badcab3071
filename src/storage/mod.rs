use crate::error::{ParleyError, Result};
use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod memory;
pub mod types;
pub use memory::{BackendOp, MemoryBackend};
pub use types::{ConversationPatch, ConversationRecord, MessageRecord, Role};

/// Table-level access to conversation and message records
///
/// Implementations perform no ownership checks; callers scope by owner.
pub trait PersistenceBackend: Send + Sync {
    /// Insert a new conversation row
    fn insert_conversation(&self, record: &ConversationRecord) -> Result<()>;

    /// The owner's most recently created conversation
    fn latest_conversation_by_created(&self, user_id: &str) -> Result<Option<ConversationRecord>>;

    /// All of the owner's conversations, most recently updated first
    fn conversations_by_updated(&self, user_id: &str) -> Result<Vec<ConversationRecord>>;

    /// Look up a conversation by id
    fn find_conversation(&self, id: &str) -> Result<Option<ConversationRecord>>;

    /// Apply a partial update; returns false if no row matched
    fn update_conversation(&self, id: &str, patch: &ConversationPatch) -> Result<bool>;

    /// Delete a conversation row; returns false if no row matched
    fn delete_conversation(&self, id: &str) -> Result<bool>;

    /// Insert a new message row
    fn insert_message(&self, record: &MessageRecord) -> Result<()>;

    /// Messages of a conversation, oldest first
    fn messages_by_created(&self, conversation_id: &str) -> Result<Vec<MessageRecord>>;

    /// Number of messages in a conversation
    fn count_messages(&self, conversation_id: &str) -> Result<usize>;

    /// Delete every message of a conversation; returns the number removed
    fn delete_messages(&self, conversation_id: &str) -> Result<usize>;
}

/// SQLite persistence backend
///
/// Each operation opens its own connection, so the backend can be shared
/// freely between tasks.
pub struct SqliteBackend {
    db_path: PathBuf,
}

fn storage_error(e: anyhow::Error) -> ParleyError {
    ParleyError::Storage(format!("{:#}", e))
}

/// Fixed-width RFC 3339 so text ordering matches chronological ordering
fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRecord> {
    let created_at: String = row.get(3)?;
    let updated_at: String = row.get(4)?;
    Ok(ConversationRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: decode_time(&created_at)?,
        updated_at: decode_time(&updated_at)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    let role: String = row.get(2)?;
    let tokens: Option<i64> = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(MessageRecord {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: role.parse::<Role>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?,
        content: row.get(3)?,
        tokens: tokens.map(|t| t.max(0) as u64),
        created_at: decode_time(&created_at)?,
    })
}

const CONVERSATION_COLUMNS: &str = "id, user_id, title, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, tokens, created_at";

impl SqliteBackend {
    /// Open the database in the platform data directory
    ///
    /// `PARLEY_DB_PATH` overrides the location.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("PARLEY_DB_PATH") {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("dev", "parley", "parley")
            .ok_or_else(|| ParleyError::Storage("Could not determine data directory".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .context("Failed to create data directory")
            .map_err(storage_error)?;

        Self::new_with_path(data_dir.join("parley.db"))
    }

    /// Open the database at a configured path, or the default location
    pub fn open(db_path: Option<&Path>) -> Result<Self> {
        match db_path {
            Some(path) => Self::new_with_path(path),
            None => Self::new(),
        }
    }

    /// Open (and create if needed) the database at `db_path`
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::storage::SqliteBackend;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let backend = SqliteBackend::new_with_path(dir.path().join("parley.db")).unwrap();
    /// assert!(backend.db_path().exists());
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(storage_error)?;
        }

        let backend = Self { db_path };
        backend.init()?;
        tracing::debug!("Opened conversation database at {}", backend.db_path.display());
        Ok(backend)
    }

    /// Location of the database file
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(storage_error)?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")
            .map_err(storage_error)?;
        Ok(conn)
    }

    fn init(&self) -> Result<()> {
        let conn = self.connect()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                tokens INTEGER,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_user_id ON conversations(user_id);
            CREATE INDEX IF NOT EXISTS idx_conversations_created_at ON conversations(created_at);
            CREATE INDEX IF NOT EXISTS idx_messages_conversation_id ON messages(conversation_id);
            CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at);",
        )
        .context("Failed to create tables")
        .map_err(storage_error)?;

        Ok(())
    }
}

impl PersistenceBackend for SqliteBackend {
    fn insert_conversation(&self, record: &ConversationRecord) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO conversations (id, user_id, title, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)",
            params![
                record.id,
                record.user_id,
                record.title,
                encode_time(&record.created_at),
                encode_time(&record.updated_at)
            ],
        )
        .context("Failed to insert conversation")
        .map_err(storage_error)?;
        Ok(())
    }

    fn latest_conversation_by_created(&self, user_id: &str) -> Result<Option<ConversationRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations
                    WHERE user_id = ?
                    ORDER BY created_at DESC, rowid DESC
                    LIMIT 1"
                ),
                params![user_id],
                conversation_from_row,
            )
            .optional()
            .context("Failed to query latest conversation")
            .map_err(storage_error)?;
        Ok(record)
    }

    fn conversations_by_updated(&self, user_id: &str) -> Result<Vec<ConversationRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                WHERE user_id = ?
                ORDER BY updated_at DESC, rowid DESC"
            ))
            .context("Failed to prepare statement")
            .map_err(storage_error)?;

        let records = stmt
            .query_map(params![user_id], conversation_from_row)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .context("Failed to query conversations")
            .map_err(storage_error)?;
        Ok(records)
    }

    fn find_conversation(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?"),
                params![id],
                conversation_from_row,
            )
            .optional()
            .context("Failed to query conversation")
            .map_err(storage_error)?;
        Ok(record)
    }

    fn update_conversation(&self, id: &str, patch: &ConversationPatch) -> Result<bool> {
        if patch.is_empty() {
            return Ok(self.find_conversation(id)?.is_some());
        }

        let conn = self.connect()?;
        let updated_at = patch.updated_at.as_ref().map(encode_time);
        let changed = conn
            .execute(
                "UPDATE conversations SET
                    title = COALESCE(?, title),
                    updated_at = COALESCE(?, updated_at)
                WHERE id = ?",
                params![patch.title, updated_at, id],
            )
            .context("Failed to update conversation")
            .map_err(storage_error)?;
        Ok(changed > 0)
    }

    fn delete_conversation(&self, id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let changed = conn
            .execute("DELETE FROM conversations WHERE id = ?", params![id])
            .context("Failed to delete conversation")
            .map_err(storage_error)?;
        Ok(changed > 0)
    }

    fn insert_message(&self, record: &MessageRecord) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO messages (id, conversation_id, role, content, tokens, created_at)
            VALUES (?, ?, ?, ?, ?, ?)",
            params![
                record.id,
                record.conversation_id,
                record.role.as_str(),
                record.content,
                record.tokens.map(|t| t as i64),
                encode_time(&record.created_at)
            ],
        )
        .context("Failed to insert message")
        .map_err(storage_error)?;
        Ok(())
    }

    fn messages_by_created(&self, conversation_id: &str) -> Result<Vec<MessageRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                WHERE conversation_id = ?
                ORDER BY created_at ASC, seq ASC"
            ))
            .context("Failed to prepare statement")
            .map_err(storage_error)?;

        let records = stmt
            .query_map(params![conversation_id], message_from_row)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .context("Failed to query messages")
            .map_err(storage_error)?;
        Ok(records)
    }

    fn count_messages(&self, conversation_id: &str) -> Result<usize> {
        let conn = self.connect()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?",
                params![conversation_id],
                |row| row.get(0),
            )
            .context("Failed to count messages")
            .map_err(storage_error)?;
        Ok(count.max(0) as usize)
    }

    fn delete_messages(&self, conversation_id: &str) -> Result<usize> {
        let conn = self.connect()?;
        let removed = conn
            .execute(
                "DELETE FROM messages WHERE conversation_id = ?",
                params![conversation_id],
            )
            .context("Failed to delete messages")
            .map_err(storage_error)?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serial_test::serial;
    use std::env;
    use tempfile::tempdir;

    /// Returns the backend together with its `TempDir` so the directory
    /// outlives the test body.
    fn create_test_backend() -> (SqliteBackend, tempfile::TempDir) {
        let dir = tempdir().expect("failed to create tempdir");
        let backend =
            SqliteBackend::new_with_path(dir.path().join("parley.db")).expect("failed to create backend");
        (backend, dir)
    }

    fn conversation(id: &str, user: &str, created_at: DateTime<Utc>) -> ConversationRecord {
        ConversationRecord {
            id: id.to_string(),
            user_id: user.to_string(),
            title: format!("title {}", id),
            created_at,
            updated_at: created_at,
        }
    }

    fn message(id: &str, conversation_id: &str, role: Role, created_at: DateTime<Utc>) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: format!("content {}", id),
            tokens: Some(3),
            created_at,
        }
    }

    #[test]
    fn test_init_creates_tables() {
        let (backend, _dir) = create_test_backend();
        let conn = Connection::open(backend.db_path()).expect("open connection");
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('conversations', 'messages')",
                [],
                |r| r.get(0),
            )
            .expect("query row");
        assert_eq!(count, 2);
    }

    #[test]
    fn test_init_is_idempotent() {
        let (backend, dir) = create_test_backend();
        let now = Utc::now();
        backend.insert_conversation(&conversation("c1", "u1", now)).unwrap();

        let reopened = SqliteBackend::new_with_path(dir.path().join("parley.db")).unwrap();
        assert!(reopened.find_conversation("c1").unwrap().is_some());
    }

    #[test]
    fn test_conversation_roundtrip() {
        let (backend, _dir) = create_test_backend();
        let record = conversation("c1", "u1", Utc::now());
        backend.insert_conversation(&record).unwrap();

        let loaded = backend.find_conversation("c1").unwrap().unwrap();
        assert_eq!(loaded.user_id, "u1");
        assert_eq!(loaded.title, "title c1");
        assert_eq!(
            loaded.created_at.timestamp_micros(),
            record.created_at.timestamp_micros()
        );
    }

    #[test]
    fn test_find_missing_conversation() {
        let (backend, _dir) = create_test_backend();
        assert!(backend.find_conversation("nope").unwrap().is_none());
    }

    #[test]
    fn test_latest_by_created_ignores_updates_and_other_owners() {
        let (backend, _dir) = create_test_backend();
        let t0 = Utc::now();
        backend.insert_conversation(&conversation("old", "u1", t0)).unwrap();
        backend
            .insert_conversation(&conversation("new", "u1", t0 + ChronoDuration::seconds(1)))
            .unwrap();
        backend
            .insert_conversation(&conversation("other", "u2", t0 + ChronoDuration::seconds(2)))
            .unwrap();
        backend
            .update_conversation(
                "old",
                &ConversationPatch {
                    updated_at: Some(t0 + ChronoDuration::seconds(10)),
                    ..Default::default()
                },
            )
            .unwrap();

        let latest = backend.latest_conversation_by_created("u1").unwrap().unwrap();
        assert_eq!(latest.id, "new");
        assert!(backend.latest_conversation_by_created("u3").unwrap().is_none());
    }

    #[test]
    fn test_conversations_by_updated_order() {
        let (backend, _dir) = create_test_backend();
        let t0 = Utc::now();
        backend.insert_conversation(&conversation("a", "u1", t0)).unwrap();
        backend
            .insert_conversation(&conversation("b", "u1", t0 + ChronoDuration::seconds(1)))
            .unwrap();
        backend
            .update_conversation(
                "a",
                &ConversationPatch {
                    updated_at: Some(t0 + ChronoDuration::seconds(5)),
                    ..Default::default()
                },
            )
            .unwrap();

        let ids: Vec<String> = backend
            .conversations_by_updated("u1")
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_update_conversation_partial() {
        let (backend, _dir) = create_test_backend();
        let t0 = Utc::now();
        backend.insert_conversation(&conversation("c1", "u1", t0)).unwrap();

        let changed = backend
            .update_conversation(
                "c1",
                &ConversationPatch {
                    title: Some("Renamed".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(changed);

        let loaded = backend.find_conversation("c1").unwrap().unwrap();
        assert_eq!(loaded.title, "Renamed");
        assert_eq!(loaded.updated_at.timestamp_micros(), t0.timestamp_micros());

        assert!(!backend
            .update_conversation("missing", &ConversationPatch {
                title: Some("x".to_string()),
                ..Default::default()
            })
            .unwrap());
    }

    #[test]
    fn test_messages_ordered_with_same_timestamp() {
        let (backend, _dir) = create_test_backend();
        let now = Utc::now();
        backend.insert_conversation(&conversation("c1", "u1", now)).unwrap();
        backend.insert_message(&message("m2", "c1", Role::User, now)).unwrap();
        backend.insert_message(&message("m1", "c1", Role::Assistant, now)).unwrap();
        backend
            .insert_message(&message("m0", "c1", Role::User, now - ChronoDuration::seconds(1)))
            .unwrap();

        let ids: Vec<String> = backend
            .messages_by_created("c1")
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["m0", "m2", "m1"]);
        assert_eq!(backend.count_messages("c1").unwrap(), 3);
    }

    #[test]
    fn test_message_fields_preserved() {
        let (backend, _dir) = create_test_backend();
        let now = Utc::now();
        backend.insert_conversation(&conversation("c1", "u1", now)).unwrap();
        let mut record = message("m1", "c1", Role::Assistant, now);
        record.content = "multi\nline \u{1F600} content".to_string();
        record.tokens = None;
        backend.insert_message(&record).unwrap();

        let loaded = &backend.messages_by_created("c1").unwrap()[0];
        assert_eq!(loaded.role, Role::Assistant);
        assert_eq!(loaded.content, record.content);
        assert_eq!(loaded.tokens, None);
    }

    #[test]
    fn test_delete_messages_then_conversation() {
        let (backend, _dir) = create_test_backend();
        let now = Utc::now();
        backend.insert_conversation(&conversation("c1", "u1", now)).unwrap();
        backend.insert_message(&message("m1", "c1", Role::User, now)).unwrap();
        backend.insert_message(&message("m2", "c1", Role::Assistant, now)).unwrap();

        assert_eq!(backend.delete_messages("c1").unwrap(), 2);
        assert!(backend.delete_conversation("c1").unwrap());
        assert!(!backend.delete_conversation("c1").unwrap());
        assert_eq!(backend.count_messages("c1").unwrap(), 0);
        assert!(backend.find_conversation("c1").unwrap().is_none());
    }

    #[test]
    #[serial]
    fn test_new_respects_env_override() {
        let dir = tempdir().expect("failed to create tempdir");
        let db_path = dir.path().join("nested").join("override.db");
        env::set_var("PARLEY_DB_PATH", &db_path);

        let backend = SqliteBackend::new().expect("create backend with override");
        assert_eq!(backend.db_path(), db_path.as_path());
        assert!(db_path.exists());

        env::remove_var("PARLEY_DB_PATH");
    }
}
