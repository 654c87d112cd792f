// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use crate::builtin::resolve_write_path;
use crate::tool::{Tool, ToolContext, ToolResult};

pub struct FileWriterTool;

#[async_trait]
impl Tool for FileWriterTool {
    fn name(&self) -> &str {
        "file_writer"
    }

    fn description(&self) -> &str {
        "Write text to a file. mode 'write' replaces the file, 'append' adds to \
         the end. Parent directories are created automatically. Relative paths \
         land in the session workspace."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Target file path"
                },
                "content": {
                    "type": "string",
                    "description": "Text to write"
                },
                "mode": {
                    "type": "string",
                    "enum": ["write", "append"],
                    "description": "write (default) replaces, append extends"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResult {
        let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::err("path is required");
        };
        let Some(content) = args.get("content").and_then(|v| v.as_str()) else {
            return ToolResult::err("content is required");
        };
        let mode = args
            .get("mode")
            .and_then(|v| v.as_str())
            .unwrap_or("write");
        if mode != "write" && mode != "append" {
            return ToolResult::err(format!("invalid mode: {mode}; use write or append"));
        }

        let resolved = resolve_write_path(path, ctx);
        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::err(format!("cannot create parent directory: {e}"));
            }
        }

        let result = if mode == "append" {
            let open = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&resolved)
                .await;
            match open {
                Ok(mut f) => f.write_all(content.as_bytes()).await,
                Err(e) => Err(e),
            }
        } else {
            tokio::fs::write(&resolved, content).await
        };

        match result {
            Ok(()) => ToolResult::ok(json!({
                "path": resolved.to_string_lossy(),
                "bytes_written": content.len(),
                "mode": mode,
            })),
            Err(e) => ToolResult::err(format!("write failed: {e}")),
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

    #[tokio::test]
    async fn write_creates_file_and_parents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/out.txt");
        let out = FileWriterTool
            .execute(
                &json!({ "path": target.to_str().unwrap(), "content": "hello" }),
                &ctx(dir.path()),
            )
            .await;
        assert!(out.is_success());
        assert_eq!(out.value()["bytes_written"], 5);
        assert_eq!(std::fs::read_to_string(target).unwrap(), "hello");
    }

    #[tokio::test]
    async fn append_extends_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("log.txt");
        let c = ctx(dir.path());
        let args = |content: &str, mode: &str| {
            json!({ "path": target.to_str().unwrap(), "content": content, "mode": mode })
        };
        FileWriterTool.execute(&args("one\n", "write"), &c).await;
        FileWriterTool.execute(&args("two\n", "append"), &c).await;
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "one\ntwo\n");
    }

    #[tokio::test]
    async fn invalid_mode_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let out = FileWriterTool
            .execute(
                &json!({ "path": "x.txt", "content": "c", "mode": "delete" }),
                &ctx(dir.path()),
            )
            .await;
        assert!(!out.is_success());
        assert!(out.error_message().unwrap().contains("invalid mode"));
    }

    #[tokio::test]
    async fn relative_path_lands_in_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());
        let out = FileWriterTool
            .execute(&json!({ "path": "notes.md", "content": "x" }), &c)
            .await;
        assert!(out.is_success());
        assert!(c.scratch_dir().join("notes.md").exists());
    }
}
