// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-user persistent key-value memory.
//!
//! One JSON file per user under `data/memory/`, guarded by a per-user lock.
//! Entry count and value length are bounded; saved entries are injected into
//! the agent system prompt so the model has continuity across conversations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::lockfile::{atomic_write, FileLock};
use crate::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub value: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct MemoryStore {
    memory_dir: PathBuf,
    max_entries: usize,
    max_value_len: usize,
}

impl MemoryStore {
    pub fn new(memory_dir: impl Into<PathBuf>, max_entries: usize, max_value_len: usize) -> Self {
        Self {
            memory_dir: memory_dir.into(),
            max_entries,
            max_value_len,
        }
    }

    fn user_file(&self, username: &str) -> PathBuf {
        self.memory_dir.join(format!("{username}.json"))
    }

    fn lock_file(&self, username: &str) -> PathBuf {
        self.memory_dir.join(format!("{username}.lock"))
    }

    fn load(&self, username: &str) -> BTreeMap<String, MemoryEntry> {
        let path = self.user_file(username);
        if !path.exists() {
            return BTreeMap::new();
        }
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    fn save(
        &self,
        username: &str,
        data: &BTreeMap<String, MemoryEntry>,
    ) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(data)?;
        atomic_write(&self.user_file(username), &text)?;
        Ok(())
    }

    /// Store a value under `key`.  Values longer than the cap are clipped;
    /// inserting a *new* key into a full store is rejected.
    pub fn set(&self, username: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(StoreError::NotFound("key cannot be empty".into()));
        }
        let clipped: String = value.chars().take(self.max_value_len).collect();
        let _guard = FileLock::acquire(&self.lock_file(username))?;
        let mut data = self.load(username);
        if data.len() >= self.max_entries && !data.contains_key(key) {
            return Err(StoreError::NotFound(format!(
                "memory is full ({} entries); delete an entry first",
                self.max_entries
            )));
        }
        data.insert(
            key.to_string(),
            MemoryEntry {
                value: clipped,
                updated_at: Utc::now().format("%Y-%m-%d %H:%M").to_string(),
            },
        );
        self.save(username, &data)
    }

    pub fn get(&self, username: &str, key: &str) -> Result<MemoryEntry, StoreError> {
        let _guard = FileLock::acquire(&self.lock_file(username))?;
        self.load(username)
            .remove(key.trim())
            .ok_or_else(|| StoreError::NotFound(format!("no memory entry for key '{key}'")))
    }

    pub fn list(&self, username: &str) -> Result<Vec<(String, MemoryEntry)>, StoreError> {
        let _guard = FileLock::acquire(&self.lock_file(username))?;
        Ok(self.load(username).into_iter().collect())
    }

    pub fn delete(&self, username: &str, key: &str) -> Result<(), StoreError> {
        let key = key.trim();
        let _guard = FileLock::acquire(&self.lock_file(username))?;
        let mut data = self.load(username);
        if data.remove(key).is_none() {
            return Err(StoreError::NotFound(format!(
                "no memory entry for key '{key}'"
            )));
        }
        self.save(username, &data)
    }

    /// Format saved entries for injection into the system prompt.
    /// Returns an empty string when the user has no entries.
    pub fn format_for_prompt(&self, username: &str) -> String {
        let data = self.load(username);
        if data.is_empty() {
            return String::new();
        }
        let mut lines = vec![
            "\n\n## PERSISTENT MEMORY".to_string(),
            "The following facts were saved from previous sessions:".to_string(),
        ];
        for (key, entry) in &data {
            lines.push(format!(
                "- {key}: {} (saved {})",
                entry.value, entry.updated_at
            ));
        }
        lines.join("\n")
    }

    pub fn memory_dir(&self) -> &Path {
        &self.memory_dir
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
