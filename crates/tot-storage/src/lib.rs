use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tot_core::{Conversation, MindMapData};

pub const ARCHIVE_SCHEMA_VERSION: i64 = 1;
const DEFAULT_DB_DIR: &str = "train-of-thought";
const DEFAULT_DB_FILE: &str = "conversations.sqlite3";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("archive connection lock poisoned")]
    LockPoisoned,
}

/// Past sessions. The archive is the only writer of `Conversation` records;
/// a live session only remembers the id it was given.
pub trait ConversationArchive: Send + Sync {
    /// Newest `updated_at` first.
    fn list(&self) -> Result<Vec<Conversation>, StorageError>;

    fn get(&self, id: &str) -> Result<Option<Conversation>, StorageError>;

    /// Updates in place when `existing_id` matches a record, otherwise
    /// creates a new one with a fresh id.
    fn save(
        &self,
        mindmap: &MindMapData,
        transcript: &str,
        existing_id: Option<&str>,
        thumbnail: Option<&str>,
    ) -> Result<Conversation, StorageError>;

    fn update_title(&self, id: &str, title: &str) -> Result<bool, StorageError>;

    fn delete(&self, id: &str) -> Result<bool, StorageError>;
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(DEFAULT_DB_DIR)
        .join(DEFAULT_DB_FILE)
}

pub struct ConversationStore {
    conn: Mutex<Connection>,
}

impl ConversationStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn()?
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > ARCHIVE_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: ARCHIVE_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let conn = self.conn()?;
            conn.execute_batch(include_str!("../migrations/0001_conversations.sql"))?;
            conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
        }

        Ok(())
    }

    pub fn save_at(
        &self,
        mindmap: &MindMapData,
        transcript: &str,
        existing_id: Option<&str>,
        thumbnail: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Conversation, StorageError> {
        let mindmap_json = serde_json::to_string(mindmap)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let title = mindmap.fallback_title();
        let now_text = format_ts(now);

        if let Some(id) = existing_id {
            let changes = self.conn()?.execute(
                "
                UPDATE conversations SET
                    title = ?2,
                    mindmap_json = ?3,
                    transcript = ?4,
                    thumbnail = COALESCE(?5, thumbnail),
                    updated_at = ?6
                WHERE id = ?1
                ",
                params![id, title, mindmap_json, transcript, thumbnail, now_text],
            )?;
            if changes > 0 {
                if let Some(updated) = self.get(id)? {
                    return Ok(updated);
                }
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.conn()?.execute(
            "
            INSERT INTO conversations (
                id,
                title,
                mindmap_json,
                transcript,
                thumbnail,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ",
            params![id, title, mindmap_json, transcript, thumbnail, now_text],
        )?;

        Ok(Conversation {
            id,
            title,
            mindmap: mindmap.clone(),
            transcript: transcript.to_string(),
            thumbnail: thumbnail.map(str::to_string),
            created_at: parse_ts(&now_text)?,
            updated_at: parse_ts(&now_text)?,
        })
    }

    pub fn count(&self) -> Result<usize, StorageError> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}

impl ConversationArchive for ConversationStore {
    fn list(&self) -> Result<Vec<Conversation>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "
            SELECT id, title, mindmap_json, transcript, thumbnail, created_at, updated_at
            FROM conversations
            ORDER BY updated_at DESC, rowid DESC
            ",
        )?;
        let rows = stmt.query_map([], read_row)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?.into_conversation()?);
        }
        Ok(conversations)
    }

    fn get(&self, id: &str) -> Result<Option<Conversation>, StorageError> {
        let row = self
            .conn()?
            .query_row(
                "
                SELECT id, title, mindmap_json, transcript, thumbnail, created_at, updated_at
                FROM conversations
                WHERE id = ?1
                ",
                [id],
                read_row,
            )
            .optional()?;
        row.map(StoredConversation::into_conversation).transpose()
    }

    fn save(
        &self,
        mindmap: &MindMapData,
        transcript: &str,
        existing_id: Option<&str>,
        thumbnail: Option<&str>,
    ) -> Result<Conversation, StorageError> {
        self.save_at(mindmap, transcript, existing_id, thumbnail, Utc::now())
    }

    fn update_title(&self, id: &str, title: &str) -> Result<bool, StorageError> {
        let changes = self.conn()?.execute(
            "UPDATE conversations SET title = ?2 WHERE id = ?1",
            params![id, title],
        )?;
        Ok(changes > 0)
    }

    fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let changes = self
            .conn()?
            .execute("DELETE FROM conversations WHERE id = ?1", [id])?;
        Ok(changes > 0)
    }
}

struct StoredConversation {
    id: String,
    title: String,
    mindmap_json: String,
    transcript: String,
    thumbnail: Option<String>,
    created_at: String,
    updated_at: String,
}

impl StoredConversation {
    fn into_conversation(self) -> Result<Conversation, StorageError> {
        let mindmap = serde_json::from_str::<MindMapData>(&self.mindmap_json)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        Ok(Conversation {
            id: self.id,
            title: self.title,
            mindmap,
            transcript: self.transcript,
            thumbnail: self.thumbnail,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<StoredConversation> {
    Ok(StoredConversation {
        id: row.get(0)?,
        title: row.get(1)?,
        mindmap_json: row.get(2)?,
        transcript: row.get(3)?,
        thumbnail: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

// Fixed-width UTC text so lexical order matches time order.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(format!("{value}: {err}")))
}
