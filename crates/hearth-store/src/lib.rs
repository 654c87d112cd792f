// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod db;
mod history;
mod lockfile;
mod memory;

pub use db::{Database, SessionMeta};
pub use history::HistoryStore;
pub use lockfile::{atomic_write, FileLock};
pub use memory::{MemoryEntry, MemoryStore};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("task join error: {0}")]
    Join(String),
}
