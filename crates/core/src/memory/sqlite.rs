//! # SQLite Memory Store
//!
//! Memory entries in a single `memory_entries` table keyed by
//! `(session_id, key)`. Deleting a session is one `DELETE` statement.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::store::{validate_key, validate_prefix, MemoryStore, StoredEntry};

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

pub struct SqliteMemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMemoryStore {
    /// Open or create the database at `path`
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open memory database")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS memory_entries (
                    session_id TEXT NOT NULL,
                    key TEXT NOT NULL,
                    data TEXT NOT NULL,
                    saved_at TEXT NOT NULL,
                    PRIMARY KEY (session_id, key)
                );
                "#,
            )
            .context("Failed to create memory_entries table")?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }

    fn row_to_entry(key: String, data: String, saved_at: String) -> Result<StoredEntry> {
        Ok(StoredEntry {
            data: serde_json::from_str(&data)
                .with_context(|| format!("Corrupt memory entry at {}", key))?,
            saved_at: DateTime::parse_from_rfc3339(&saved_at)
                .with_context(|| format!("Bad timestamp at {}", key))?
                .with_timezone(&Utc),
            key,
        })
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn put(&self, session_id: &str, entry: StoredEntry) -> Result<()> {
        validate_key(&entry.key)?;
        let data = serde_json::to_string(&entry.data)?;
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            INSERT INTO memory_entries (session_id, key, data, saved_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(session_id, key) DO UPDATE SET
                data = excluded.data,
                saved_at = excluded.saved_at
            "#,
            params![session_id, entry.key, data, entry.saved_at.to_rfc3339()],
        )
        .context("Failed to write memory entry")?;

        Ok(())
    }

    async fn get(&self, session_id: &str, key: &str) -> Result<Option<StoredEntry>> {
        validate_key(key)?;
        let row = {
            let conn = self
                .conn
                .lock()
                .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

            conn.query_row(
                "SELECT data, saved_at FROM memory_entries WHERE session_id = ?1 AND key = ?2",
                params![session_id, key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .context("Failed to read memory entry")?
        };

        row.map(|(data, saved_at)| Self::row_to_entry(key.to_string(), data, saved_at))
            .transpose()
    }

    async fn list_keys(&self, session_id: &str, prefix: &str) -> Result<Vec<String>> {
        validate_prefix(prefix)?;
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        // substr comparison avoids LIKE wildcard escaping for `_`
        let mut stmt = conn.prepare(
            r#"
            SELECT key FROM memory_entries
            WHERE session_id = ?1 AND substr(key, 1, length(?2)) = ?2
            "#,
        )?;

        let keys = stmt
            .query_map(params![session_id, prefix], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to list memory keys")?;

        Ok(keys)
    }

    async fn delete_prefix(&self, session_id: &str, prefix: &str) -> Result<usize> {
        validate_prefix(prefix)?;
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let removed = conn
            .execute(
                "DELETE FROM memory_entries WHERE session_id = ?1 AND substr(key, 1, length(?2)) = ?2",
                params![session_id, prefix],
            )
            .context("Failed to delete memory entries")?;
        Ok(removed)
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "DELETE FROM memory_entries WHERE session_id = ?1",
            params![session_id],
        )
        .context("Failed to delete session memory")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
