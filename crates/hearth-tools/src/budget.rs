// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-result size budgeting (microcompaction, stage 1).
//!
//! Every tool result is serialized to JSON before being fed back to the
//! model.  A serialization that exceeds the tool's char budget is cut at a
//! char boundary and finished with an explicit truncation marker; when the
//! call is bound to a session, the full serialization is spilled to a
//! per-session overflow file so it can be retrieved later.

use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::warn;

use crate::tool::ToolResult;

#[derive(Debug)]
pub struct BudgetOutcome {
    /// What gets fed back to the model.
    pub serialized: String,
    pub truncated: bool,
    /// Where the full serialization went, when truncation occurred under a
    /// bound session.
    pub overflow_file: Option<PathBuf>,
}

/// Apply the budget to one result.
///
/// Guarantees `serialized.chars().count() <= budget_chars + marker length`.
pub fn apply_budget(
    result: &ToolResult,
    budget_chars: usize,
    session_id: Option<&str>,
    overflow_root: &Path,
) -> BudgetOutcome {
    let full = result.serialize();
    let total_chars = full.chars().count();
    if total_chars <= budget_chars {
        return BudgetOutcome {
            serialized: full,
            truncated: false,
            overflow_file: None,
        };
    }

    let head: String = full.chars().take(budget_chars).collect();
    let serialized = format!("{head}...[truncated, {total_chars} chars total]");

    let overflow_file = session_id.and_then(|sid| match spill(overflow_root, sid, &full) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("failed to write tool-result overflow file: {e}");
            None
        }
    });

    BudgetOutcome {
        serialized,
        truncated: true,
        overflow_file,
    }
}

fn spill(root: &Path, session_id: &str, full: &str) -> std::io::Result<PathBuf> {
    let dir = root.join(session_id);
    std::fs::create_dir_all(&dir)?;
    let id: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    let path = dir.join(format!("{id}.json"));
    std::fs::write(&path, full)?;
    Ok(path)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn small_result_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let r = ToolResult::ok(json!({ "k": "v" }));
        let out = apply_budget(&r, 1_000, Some("s1"), dir.path());
        assert!(!out.truncated);
        assert!(out.overflow_file.is_none());
        assert_eq!(out.serialized, r.serialize());
    }

    #[test]
    fn oversized_result_is_truncated_with_marker() {
        let dir = tempfile::tempdir().unwrap();
        let r = ToolResult::ok(json!({ "blob": "x".repeat(500) }));
        let full_chars = r.serialize().chars().count();
        let out = apply_budget(&r, 100, Some("s1"), dir.path());
        assert!(out.truncated);
        assert!(out
            .serialized
            .ends_with(&format!("...[truncated, {full_chars} chars total]")));
    }

    #[test]
    fn truncated_length_is_bounded_by_budget_plus_marker() {
        let dir = tempfile::tempdir().unwrap();
        let r = ToolResult::ok(json!({ "blob": "y".repeat(10_000) }));
        let budget = 256;
        let out = apply_budget(&r, budget, Some("s1"), dir.path());
        let marker_len = format!(
            "...[truncated, {} chars total]",
            r.serialize().chars().count()
        )
        .len();
        assert!(out.serialized.chars().count() <= budget + marker_len);
    }

    #[test]
    fn full_result_is_retrievable_from_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let r = ToolResult::ok(json!({ "blob": "z".repeat(500) }));
        let out = apply_budget(&r, 50, Some("sess-9"), dir.path());
        let path = out.overflow_file.expect("overflow file should exist");
        assert!(path.starts_with(dir.path().join("sess-9")));
        let stored = std::fs::read_to_string(path).unwrap();
        assert_eq!(stored, r.serialize());
    }

    #[test]
    fn no_session_means_no_overflow_file() {
        let dir = tempfile::tempdir().unwrap();
        let r = ToolResult::ok(json!({ "blob": "w".repeat(500) }));
        let out = apply_budget(&r, 50, None, dir.path());
        assert!(out.truncated);
        assert!(out.overflow_file.is_none());
    }

    #[test]
    fn truncation_respects_multibyte_chars() {
        let dir = tempfile::tempdir().unwrap();
        let r = ToolResult::ok(json!({ "blob": "日本語テキスト".repeat(100) }));
        let out = apply_budget(&r, 64, None, dir.path());
        // Must not panic and must remain valid UTF-8 (guaranteed by String).
        assert!(out.truncated);
        assert!(out.serialized.contains("truncated"));
    }
}
