// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Document retrieval over per-user collections.
//!
//! A collection is a directory of text documents under
//! `data/rag/{username}/{collection}/`.  Retrieval splits documents into
//! paragraph chunks and ranks them by query-term overlap.  The indexing
//! engine proper is an external collaborator that maintains the same layout;
//! this body is the seam it plugs into.
//!
//! Collection-name validation happens in the agent loop *before* dispatch,
//! so a call that reaches `execute` is already known to name an existing
//! collection of the current user.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::tool::{Tool, ToolContext, ToolResult};

const DEFAULT_MAX_RESULTS: usize = 5;

/// Names of the collections owned by `username`, sorted.
pub fn list_collections(rag_dir: &Path, username: &str) -> Vec<String> {
    let user_dir = rag_dir.join(username);
    let mut names: Vec<String> = std::fs::read_dir(user_dir)
        .map(|rd| {
            rd.flatten()
                .filter(|e| e.path().is_dir())
                .filter_map(|e| e.file_name().into_string().ok())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

pub struct RagTool;

#[async_trait]
impl Tool for RagTool {
    fn name(&self) -> &str {
        "rag"
    }

    fn description(&self) -> &str {
        "Search your document collections for relevant passages. The available \
         collection names are listed in the system prompt; pass one of them as \
         collection_name."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "collection_name": {
                    "type": "string",
                    "description": "Name of the collection to search"
                },
                "query": {
                    "type": "string",
                    "description": "What to look for"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Number of chunks to return (default 5)"
                }
            },
            "required": ["collection_name", "query"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResult {
        let Some(collection) = args.get("collection_name").and_then(|v| v.as_str()) else {
            return ToolResult::err("collection_name is required");
        };
        let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
            return ToolResult::err("query is required");
        };
        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let collection_dir = ctx.paths.rag_dir.join(&ctx.username).join(collection);
        if !collection_dir.is_dir() {
            return ToolResult::err_with(
                format!("unknown collection: {collection}"),
                json!({
                    "available_collections": list_collections(&ctx.paths.rag_dir, &ctx.username)
                }),
            );
        }

        let mut scored = rank_chunks(&collection_dir, query);
        scored.truncate(max_results);
        let results: Vec<Value> = scored
            .into_iter()
            .map(|c| {
                json!({
                    "content": c.content,
                    "source": c.source,
                    "score": c.score,
                })
            })
            .collect();
        ToolResult::ok(json!({
            "collection": collection,
            "query": query,
            "count": results.len(),
            "results": results,
        }))
    }
}

struct Chunk {
    content: String,
    source: String,
    score: f64,
}

/// Split every document into paragraph chunks and score them by query-term
/// overlap, best first.
fn rank_chunks(collection_dir: &PathBuf, query: &str) -> Vec<Chunk> {
    let terms: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if terms.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    for entry in WalkDir::new(collection_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let Ok(text) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let source = entry
            .path()
            .strip_prefix(collection_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        for paragraph in text.split("\n\n").filter(|p| !p.trim().is_empty()) {
            let lower = paragraph.to_lowercase();
            let hits = terms.iter().filter(|t| lower.contains(t.as_str())).count();
            if hits == 0 {
                continue;
            }
            chunks.push(Chunk {
                content: paragraph.trim().to_string(),
                source: source.clone(),
                score: hits as f64 / terms.len() as f64,
            });
        }
    }
    chunks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    chunks
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

    fn seed_collection(dir: &std::path::Path) {
        let coll = dir.join("rag/alice/manuals");
        std::fs::create_dir_all(&coll).unwrap();
        std::fs::write(
            coll.join("pump.md"),
            "The pump requires priming before first use.\n\n\
             Maintenance interval is twelve months for the pump assembly.",
        )
        .unwrap();
        std::fs::write(
            coll.join("valve.md"),
            "Valve torque specification is 20 Nm.\n\nUnrelated paragraph about paint.",
        )
        .unwrap();
    }

    #[test]
    fn list_collections_sorted_and_scoped() {
        let dir = tempfile::tempdir().unwrap();
        seed_collection(dir.path());
        std::fs::create_dir_all(dir.path().join("rag/alice/archive")).unwrap();
        std::fs::create_dir_all(dir.path().join("rag/bob/private")).unwrap();
        let names = list_collections(&dir.path().join("rag"), "alice");
        assert_eq!(names, vec!["archive", "manuals"]);
    }

    #[test]
    fn list_collections_empty_for_unknown_user() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_collections(&dir.path().join("rag"), "nobody").is_empty());
    }

    #[tokio::test]
    async fn search_returns_ranked_chunks() {
        let dir = tempfile::tempdir().unwrap();
        seed_collection(dir.path());
        let out = RagTool
            .execute(
                &json!({ "collection_name": "manuals", "query": "pump maintenance" }),
                &ctx(dir.path()),
            )
            .await;
        assert!(out.is_success());
        let results = out.value()["results"].as_array().unwrap();
        assert!(!results.is_empty());
        // The chunk containing both terms ranks first.
        assert!(results[0]["content"]
            .as_str()
            .unwrap()
            .contains("Maintenance interval"));
        assert_eq!(results[0]["score"], 1.0);
        assert_eq!(results[0]["source"], "pump.md");
    }

    #[tokio::test]
    async fn unknown_collection_lists_available() {
        let dir = tempfile::tempdir().unwrap();
        seed_collection(dir.path());
        let out = RagTool
            .execute(
                &json!({ "collection_name": "docs", "query": "hi" }),
                &ctx(dir.path()),
            )
            .await;
        assert!(!out.is_success());
        assert_eq!(out.value()["available_collections"], json!(["manuals"]));
    }

    #[tokio::test]
    async fn max_results_caps_output() {
        let dir = tempfile::tempdir().unwrap();
        seed_collection(dir.path());
        let out = RagTool
            .execute(
                &json!({
                    "collection_name": "manuals",
                    "query": "pump valve paint",
                    "max_results": 1
                }),
                &ctx(dir.path()),
            )
            .await;
        assert_eq!(out.value()["count"], 1);
    }
}
