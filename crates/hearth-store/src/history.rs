// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Conversation history documents.
//!
//! One human-readable JSON file per session under `data/sessions/`, guarded
//! by a per-session advisory lock.  A turn's messages are written in a single
//! save, so a partially-completed turn is never persisted.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use hearth_model::ChatMessage;

use crate::lockfile::{atomic_write, FileLock};
use crate::StoreError;

#[derive(Debug, Serialize, Deserialize)]
struct HistoryDocument {
    session_id: String,
    updated_at: String,
    messages: Vec<ChatMessage>,
}

#[derive(Clone)]
pub struct HistoryStore {
    sessions_dir: PathBuf,
}

impl HistoryStore {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
        }
    }

    fn doc_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}.json"))
    }

    fn lock_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}.lock"))
    }

    /// Load a session's messages.  A missing document is an empty history,
    /// not an error — the metadata row is the source of session existence.
    pub async fn load_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let doc = self.doc_path(session_id);
        let lock = self.lock_path(session_id);
        let sid = session_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<ChatMessage>, StoreError> {
            if !doc.exists() {
                return Ok(Vec::new());
            }
            let _guard = FileLock::acquire(&lock)?;
            let text = std::fs::read_to_string(&doc)?;
            let parsed: HistoryDocument = serde_json::from_str(&text).map_err(|e| {
                StoreError::Serde(e)
            })?;
            debug_assert_eq!(parsed.session_id, sid);
            Ok(parsed.messages)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Persist the full message list for a session in one atomic write.
    pub async fn save_messages(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
    ) -> Result<(), StoreError> {
        let doc = self.doc_path(session_id);
        let lock = self.lock_path(session_id);
        let payload = HistoryDocument {
            session_id: session_id.to_string(),
            updated_at: Utc::now().to_rfc3339(),
            messages: messages.to_vec(),
        };
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let text = serde_json::to_string_pretty(&payload)?;
            let _guard = FileLock::acquire(&lock)?;
            atomic_write(&doc, &text)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Remove a session's document and lock file.
    pub fn delete(&self, session_id: &str) {
        let _ = std::fs::remove_file(self.doc_path(session_id));
        let _ = std::fs::remove_file(self.lock_path(session_id));
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, HistoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("sessions"));
        (dir, store)
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let (_dir, store) = store();
        let msgs = vec![
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi there"),
        ];
        store.save_messages("s1", &msgs).await.unwrap();
        let loaded = store.load_messages("s1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn missing_document_is_empty_history() {
        let (_dir, store) = store();
        assert!(store.load_messages("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_overwrites_previous_document() {
        let (_dir, store) = store();
        store
            .save_messages("s1", &[ChatMessage::user("one")])
            .await
            .unwrap();
        store
            .save_messages(
                "s1",
                &[ChatMessage::user("one"), ChatMessage::assistant("two")],
            )
            .await
            .unwrap();
        let loaded = store.load_messages("s1").await.unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn document_is_human_readable_json() {
        let (_dir, store) = store();
        store
            .save_messages("s1", &[ChatMessage::user("inspect me")])
            .await
            .unwrap();
        let raw =
            std::fs::read_to_string(store.doc_path("s1")).unwrap();
        // Pretty-printed with the session id and role visible.
        assert!(raw.contains("\"session_id\": \"s1\""));
        assert!(raw.contains("\"role\": \"user\""));
        assert!(raw.contains('\n'));
    }

    #[tokio::test]
    async fn delete_removes_document_and_lock() {
        let (_dir, store) = store();
        store
            .save_messages("s1", &[ChatMessage::user("x")])
            .await
            .unwrap();
        store.delete("s1");
        assert!(!store.doc_path("s1").exists());
        assert!(!store.lock_path("s1").exists());
    }
}
