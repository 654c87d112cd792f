// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Relational metadata: users and session records.
//!
//! A single SQLite connection is shared behind a mutex; every query runs on
//! the blocking thread pool so session lookups never stall the async
//! scheduler.  Conversation content is **not** stored here — see
//! [`crate::HistoryStore`] for the message documents.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::StoreError;

/// Session metadata row.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: Option<String>,
    pub message_count: i64,
}

/// Titles are capped at this many chars on write.
const TITLE_MAX_CHARS: usize = 120;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with the connection on the blocking pool.
    async fn run_blocking<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, rusqlite::Error> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("db mutex poisoned");
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
        .map_err(StoreError::from)
    }

    pub async fn create_session(
        &self,
        session_id: &str,
        username: &str,
    ) -> Result<(), StoreError> {
        let (id, user) = (session_id.to_string(), username.to_string());
        self.run_blocking(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO sessions (id, username, created_at, updated_at, message_count)
                 VALUES (?1, ?2, ?3, ?3, 0)",
                params![id, user, now],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionMeta>, StoreError> {
        let id = session_id.to_string();
        self.run_blocking(move |conn| {
            conn.query_row(
                "SELECT id, username, created_at, updated_at, title, message_count
                 FROM sessions WHERE id = ?1",
                params![id],
                row_to_meta,
            )
            .optional()
        })
        .await
    }

    pub async fn list_sessions(&self, username: &str) -> Result<Vec<SessionMeta>, StoreError> {
        let user = username.to_string();
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, created_at, updated_at, title, message_count
                 FROM sessions WHERE username = ?1 ORDER BY updated_at DESC",
            )?;
            let rows = stmt.query_map(params![user], row_to_meta)?;
            rows.collect()
        })
        .await
    }

    /// Search a user's sessions by title or id substring.
    pub async fn search_sessions(
        &self,
        username: &str,
        query: &str,
    ) -> Result<Vec<SessionMeta>, StoreError> {
        let user = username.to_string();
        let pattern = format!("%{}%", query.trim());
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, created_at, updated_at, title, message_count
                 FROM sessions
                 WHERE username = ?1 AND (title LIKE ?2 OR id LIKE ?2)
                 ORDER BY updated_at DESC",
            )?;
            let rows = stmt.query_map(params![user, pattern], row_to_meta)?;
            rows.collect()
        })
        .await
    }

    pub async fn set_title(&self, session_id: &str, title: &str) -> Result<(), StoreError> {
        let id = session_id.to_string();
        let capped: String = title.trim().chars().take(TITLE_MAX_CHARS).collect();
        self.run_blocking(move |conn| {
            conn.execute(
                "UPDATE sessions SET title = ?1 WHERE id = ?2",
                params![capped, id],
            )?;
            Ok(())
        })
        .await
    }

    /// Update the stored message count and stamp `updated_at`.
    pub async fn update_message_count(
        &self,
        session_id: &str,
        count: usize,
    ) -> Result<(), StoreError> {
        let id = session_id.to_string();
        self.run_blocking(move |conn| {
            conn.execute(
                "UPDATE sessions SET message_count = ?1, updated_at = ?2 WHERE id = ?3",
                params![count as i64, Utc::now().to_rfc3339(), id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        let id = session_id.to_string();
        self.run_blocking(move |conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    /// Remove sessions idle for more than `max_age_days`; returns the ids so
    /// the caller can delete their message documents too.
    pub async fn gc_sessions(&self, max_age_days: i64) -> Result<Vec<String>, StoreError> {
        let cutoff = (Utc::now() - Duration::days(max_age_days)).to_rfc3339();
        let removed = self
            .run_blocking(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT id FROM sessions WHERE updated_at < ?1")?;
                let ids: Vec<String> = stmt
                    .query_map(params![cutoff.clone()], |row| row.get(0))?
                    .collect::<Result<_, _>>()?;
                conn.execute("DELETE FROM sessions WHERE updated_at < ?1", params![cutoff])?;
                Ok(ids)
            })
            .await?;
        if !removed.is_empty() {
            info!(count = removed.len(), "swept idle sessions");
        }
        Ok(removed)
    }
}

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             username TEXT UNIQUE NOT NULL,
             password_hash TEXT,
             role TEXT DEFAULT 'user',
             created_at TEXT DEFAULT (datetime('now'))
         );
         CREATE TABLE IF NOT EXISTS sessions (
             id TEXT PRIMARY KEY,
             username TEXT NOT NULL,
             created_at TEXT NOT NULL,
             updated_at TEXT NOT NULL,
             title TEXT,
             message_count INTEGER DEFAULT 0
         );",
    )
}

fn row_to_meta(row: &rusqlite::Row<'_>) -> Result<SessionMeta, rusqlite::Error> {
    let created: String = row.get(2)?;
    let updated: String = row.get(3)?;
    Ok(SessionMeta {
        id: row.get(0)?,
        username: row.get(1)?,
        created_at: parse_ts(&created),
        updated_at: parse_ts(&updated),
        title: row.get(4)?,
        message_count: row.get(5)?,
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn create_and_get_session() {
        let db = db().await;
        db.create_session("s1", "alice").await.unwrap();
        let meta = db.get_session("s1").await.unwrap().unwrap();
        assert_eq!(meta.username, "alice");
        assert_eq!(meta.message_count, 0);
        assert!(meta.title.is_none());
    }

    #[tokio::test]
    async fn get_unknown_session_is_none() {
        let db = db().await;
        assert!(db.get_session("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_session_id_is_an_error() {
        let db = db().await;
        db.create_session("s1", "alice").await.unwrap();
        assert!(db.create_session("s1", "alice").await.is_err());
    }

    #[tokio::test]
    async fn list_sessions_is_scoped_by_user() {
        let db = db().await;
        db.create_session("a1", "alice").await.unwrap();
        db.create_session("b1", "bob").await.unwrap();
        let sessions = db.list_sessions("alice").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "a1");
    }

    #[tokio::test]
    async fn search_matches_title_and_id() {
        let db = db().await;
        db.create_session("abc-123", "alice").await.unwrap();
        db.create_session("xyz-789", "alice").await.unwrap();
        db.set_title("xyz-789", "tokyo population report").await.unwrap();

        let by_id = db.search_sessions("alice", "abc").await.unwrap();
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0].id, "abc-123");

        let by_title = db.search_sessions("alice", "tokyo").await.unwrap();
        assert_eq!(by_title.len(), 1);
        assert_eq!(by_title[0].id, "xyz-789");
    }

    #[tokio::test]
    async fn set_title_caps_length() {
        let db = db().await;
        db.create_session("s1", "alice").await.unwrap();
        db.set_title("s1", &"t".repeat(500)).await.unwrap();
        let meta = db.get_session("s1").await.unwrap().unwrap();
        assert_eq!(meta.title.unwrap().len(), 120);
    }

    #[tokio::test]
    async fn update_message_count_bumps_updated_at() {
        let db = db().await;
        db.create_session("s1", "alice").await.unwrap();
        let before = db.get_session("s1").await.unwrap().unwrap().updated_at;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        db.update_message_count("s1", 4).await.unwrap();
        let meta = db.get_session("s1").await.unwrap().unwrap();
        assert_eq!(meta.message_count, 4);
        assert!(meta.updated_at >= before);
    }

    #[tokio::test]
    async fn gc_removes_only_stale_sessions() {
        let db = db().await;
        db.create_session("fresh", "alice").await.unwrap();
        db.create_session("stale", "alice").await.unwrap();
        // Backdate the stale session directly.
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = 'stale'",
                params![(Utc::now() - Duration::days(90)).to_rfc3339()],
            )
            .unwrap();
        }
        let removed = db.gc_sessions(30).await.unwrap();
        assert_eq!(removed, vec!["stale".to_string()]);
        assert!(db.get_session("stale").await.unwrap().is_none());
        assert!(db.get_session("fresh").await.unwrap().is_some());
    }
}
