// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::builtin::resolve_read_path;
use crate::tool::{Tool, ToolContext, ToolResult};

/// Upper bound on entries returned by any operation.
const MAX_ENTRIES: usize = 200;

/// Depth ceiling for `tree`.
const TREE_DEPTH: usize = 4;

pub struct FileNavigatorTool;

#[async_trait]
impl Tool for FileNavigatorTool {
    fn name(&self) -> &str {
        "file_navigator"
    }

    fn description(&self) -> &str {
        "Explore the filesystem. operation 'list' shows one directory, 'search' \
         finds files whose name contains the pattern (recursive), 'tree' renders \
         a directory tree. Defaults to the session workspace when no path is given."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["list", "search", "tree"],
                    "description": "What to do"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to operate on (default: session workspace)"
                },
                "pattern": {
                    "type": "string",
                    "description": "Filename substring to match (required for search)"
                }
            },
            "required": ["operation"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResult {
        let Some(operation) = args.get("operation").and_then(|v| v.as_str()) else {
            return ToolResult::err("operation is required (list/search/tree)");
        };
        let base = match args.get("path").and_then(|v| v.as_str()) {
            Some(p) => resolve_read_path(p, ctx),
            None => ctx.scratch_dir(),
        };
        if !base.is_dir() {
            return ToolResult::err(format!("not a directory: {}", base.to_string_lossy()));
        }

        match operation {
            "list" => {
                let mut entries = Vec::new();
                let read = match std::fs::read_dir(&base) {
                    Ok(r) => r,
                    Err(e) => return ToolResult::err(format!("list failed: {e}")),
                };
                for entry in read.flatten().take(MAX_ENTRIES) {
                    let meta = entry.metadata().ok();
                    entries.push(json!({
                        "name": entry.file_name().to_string_lossy(),
                        "type": if meta.as_ref().map(|m| m.is_dir()).unwrap_or(false) {
                            "directory"
                        } else {
                            "file"
                        },
                        "size": meta.map(|m| m.len()).unwrap_or(0),
                    }));
                }
                entries.sort_by(|a, b| {
                    a["name"]
                        .as_str()
                        .unwrap_or("")
                        .cmp(b["name"].as_str().unwrap_or(""))
                });
                ToolResult::ok(json!({
                    "operation": "list",
                    "path": base.to_string_lossy(),
                    "entries": entries,
                }))
            }
            "search" => {
                let Some(pattern) = args.get("pattern").and_then(|v| v.as_str()) else {
                    return ToolResult::err("pattern is required for search");
                };
                let needle = pattern.to_lowercase();
                let mut matches = Vec::new();
                for entry in WalkDir::new(&base)
                    .follow_links(false)
                    .into_iter()
                    .filter_map(|e| e.ok())
                {
                    if matches.len() >= MAX_ENTRIES {
                        break;
                    }
                    let name = entry.file_name().to_string_lossy().to_lowercase();
                    if name.contains(&needle) {
                        matches.push(json!({
                            "path": entry.path().to_string_lossy(),
                            "type": if entry.file_type().is_dir() { "directory" } else { "file" },
                        }));
                    }
                }
                ToolResult::ok(json!({
                    "operation": "search",
                    "pattern": pattern,
                    "entries": matches,
                    "count": matches.len(),
                }))
            }
            "tree" => {
                let mut lines = Vec::new();
                for entry in WalkDir::new(&base)
                    .follow_links(false)
                    .max_depth(TREE_DEPTH)
                    .into_iter()
                    .filter_map(|e| e.ok())
                {
                    if lines.len() >= MAX_ENTRIES {
                        lines.push("...".to_string());
                        break;
                    }
                    let depth = entry.depth();
                    if depth == 0 {
                        continue;
                    }
                    let marker = if entry.file_type().is_dir() { "/" } else { "" };
                    lines.push(format!(
                        "{}{}{marker}",
                        "  ".repeat(depth - 1),
                        entry.file_name().to_string_lossy()
                    ));
                }
                ToolResult::ok(json!({
                    "operation": "tree",
                    "path": base.to_string_lossy(),
                    "tree": lines.join("\n"),
                }))
            }
            other => ToolResult::err(format!(
                "unknown operation: {other}. Use list/search/tree."
            )),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn ctx(dir: &std::path::Path) -> ToolContext {
        let mut config = hearth_config::Config::default();
        config.data_dir = dir.to_path_buf();
        ToolContext {
            session_id: Some("s1".into()),
            username: "alice".into(),
            paths: config.paths(),
            tools_cfg: config.tools.clone(),
            memory: Arc::new(hearth_store::MemoryStore::new(dir.join("memory"), 10, 100)),
            backend: None,
            model: "test".into(),
        }
    }

    fn seed(dir: &std::path::Path) {
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("report.csv"), "a,b").unwrap();
        std::fs::write(dir.join("sub/nested_report.txt"), "x").unwrap();
    }

    #[tokio::test]
    async fn list_returns_sorted_entries() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let out = FileNavigatorTool
            .execute(
                &json!({ "operation": "list", "path": dir.path().to_str().unwrap() }),
                &ctx(dir.path()),
            )
            .await;
        assert!(out.is_success());
        let entries = out.value()["entries"].as_array().unwrap();
        assert!(entries.iter().any(|e| e["name"] == "report.csv"));
        assert!(entries
            .iter()
            .any(|e| e["name"] == "sub" && e["type"] == "directory"));
    }

    #[tokio::test]
    async fn search_finds_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let out = FileNavigatorTool
            .execute(
                &json!({
                    "operation": "search",
                    "path": dir.path().to_str().unwrap(),
                    "pattern": "REPORT"
                }),
                &ctx(dir.path()),
            )
            .await;
        assert!(out.is_success());
        assert_eq!(out.value()["count"], 2);
    }

    #[tokio::test]
    async fn search_without_pattern_fails() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let out = FileNavigatorTool
            .execute(
                &json!({ "operation": "search", "path": dir.path().to_str().unwrap() }),
                &ctx(dir.path()),
            )
            .await;
        assert!(!out.is_success());
    }

    #[tokio::test]
    async fn tree_renders_indented_listing() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let out = FileNavigatorTool
            .execute(
                &json!({ "operation": "tree", "path": dir.path().to_str().unwrap() }),
                &ctx(dir.path()),
            )
            .await;
        assert!(out.is_success());
        let tree = out.value()["tree"].as_str().unwrap();
        assert!(tree.contains("sub/"));
        assert!(tree.contains("  nested_report.txt"));
    }

    #[tokio::test]
    async fn default_path_is_session_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());
        std::fs::create_dir_all(c.scratch_dir()).unwrap();
        std::fs::write(c.scratch_dir().join("here.txt"), "x").unwrap();
        let out = FileNavigatorTool
            .execute(&json!({ "operation": "list" }), &c)
            .await;
        assert!(out.is_success());
        let entries = out.value()["entries"].as_array().unwrap();
        assert!(entries.iter().any(|e| e["name"] == "here.txt"));
    }
}
