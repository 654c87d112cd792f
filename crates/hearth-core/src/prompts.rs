// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! System prompt assembly.
//!
//! The base prompt is loaded from disk once at process start into a
//! process-wide cache and only replaced through [`reload_prompt_cache`].
//! Per-request appendices (RAG collections, attached files, persistent
//! memory) are rendered in a fixed order with deterministic content so that
//! the bytes sent to the backend are identical across turns of the same
//! conversation — that byte stability is what lets the backend reuse its
//! attention-key cache.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde_json::Value;
use tracing::{info, warn};

const DEFAULT_BASE_PROMPT: &str = "\
You are a capable assistant with access to tools. Use tools when they help \
answer the request; answer directly when they do not. Think step by step for \
multi-part tasks, keep replies concise, and never fabricate tool output.";

static PROMPT_CACHE: RwLock<Option<CachedPrompt>> = RwLock::new(None);

/// The cache is process-global; tests that reinitialise it serialise on this.
#[cfg(test)]
pub(crate) static CACHE_GUARD: std::sync::Mutex<()> = std::sync::Mutex::new(());

struct CachedPrompt {
    text: String,
    source: Option<PathBuf>,
}

/// Load the base prompt at process start.  Falls back to the built-in prompt
/// when no path is configured or the file cannot be read.
pub fn init_prompt_cache(path: Option<&Path>) {
    let (text, source) = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(text) => {
                info!(path = %p.display(), "loaded base system prompt");
                (text, Some(p.to_path_buf()))
            }
            Err(e) => {
                warn!(path = %p.display(), "cannot read system prompt, using default: {e}");
                (DEFAULT_BASE_PROMPT.to_string(), Some(p.to_path_buf()))
            }
        },
        None => (DEFAULT_BASE_PROMPT.to_string(), None),
    };
    *PROMPT_CACHE.write().expect("prompt cache poisoned") = Some(CachedPrompt { text, source });
}

/// Hot-swap: re-read the configured prompt file into the cache.
pub fn reload_prompt_cache() -> anyhow::Result<()> {
    let source = {
        let guard = PROMPT_CACHE.read().expect("prompt cache poisoned");
        guard.as_ref().and_then(|c| c.source.clone())
    };
    match source {
        Some(path) => {
            let text = std::fs::read_to_string(&path)?;
            *PROMPT_CACHE.write().expect("prompt cache poisoned") = Some(CachedPrompt {
                text,
                source: Some(path),
            });
            Ok(())
        }
        None => Ok(()), // nothing configured; the built-in prompt stays
    }
}

fn base_prompt() -> String {
    PROMPT_CACHE
        .read()
        .expect("prompt cache poisoned")
        .as_ref()
        .map(|c| c.text.clone())
        .unwrap_or_else(|| DEFAULT_BASE_PROMPT.to_string())
}

/// Structural metadata of one uploaded file, as extracted at upload time.
#[derive(Debug, Clone)]
pub struct AttachmentMeta {
    pub name: String,
    pub file_type: String,
    pub size: u64,
    /// Extra structure hints (row/column counts, line counts, JSON keys).
    /// A BTreeMap keeps the rendering deterministic.
    pub extra: BTreeMap<String, Value>,
}

/// Assemble the full system prompt for one run.
///
/// `rag_collections` is `Some` iff the `rag` tool is enabled for the run;
/// the empty list is rendered explicitly so the model knows there is nothing
/// to search rather than guessing collection names.
pub fn assemble_system_prompt(
    rag_collections: Option<&[String]>,
    attachments: &[AttachmentMeta],
    memory_section: &str,
) -> String {
    let mut prompt = base_prompt();

    if let Some(collections) = rag_collections {
        prompt.push_str("\n\n## RAG COLLECTIONS\n");
        if collections.is_empty() {
            prompt.push_str("No document collections are available for this user.");
        } else {
            prompt.push_str("You can search these document collections with the rag tool:\n");
            for name in collections {
                prompt.push_str(&format!("- {name}\n"));
            }
        }
    }

    if !attachments.is_empty() {
        prompt.push_str("\n\n## ATTACHED FILES\n");
        prompt.push_str("The user attached these files to the conversation:\n");
        for meta in attachments {
            let mut line = format!("- {} ({}, {} bytes", meta.name, meta.file_type, meta.size);
            for (key, value) in &meta.extra {
                line.push_str(&format!(", {key}: {value}"));
            }
            line.push(')');
            prompt.push_str(&line);
            prompt.push('\n');
        }
    }

    if !memory_section.is_empty() {
        prompt.push_str(memory_section);
    }

    prompt
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
