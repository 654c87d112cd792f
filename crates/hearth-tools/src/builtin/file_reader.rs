// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::builtin::resolve_read_path;
use crate::tool::{Tool, ToolContext, ToolResult};

/// Extensions accepted as text.  Everything else is refused — binary content
/// fed to the model is wasted context at best.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "json", "csv", "py", "js", "ts", "jsx", "tsx", "html", "css", "xml", "yaml",
    "yml", "log", "ini", "cfg", "toml", "sh", "bat", "sql", "java", "cpp", "c", "h", "go", "rs",
    "rb", "php", "lua", "tex", "rst", "env", "gitignore",
];

/// Default maximum lines returned in one call.
const DEFAULT_LIMIT: usize = 1_000;

pub struct FileReaderTool;

#[async_trait]
impl Tool for FileReaderTool {
    fn name(&self) -> &str {
        "file_reader"
    }

    fn description(&self) -> &str {
        "Read a text file. Returns the content, total line count, and whether the \
         output was truncated. Use 'offset' (1-based line number) and 'limit' to \
         page through large files. Only text file extensions are supported."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute path, or a path relative to the session workspace or your uploads"
                },
                "offset": {
                    "type": "integer",
                    "description": "First line to return, 1-based (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 1000)"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResult {
        let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::err("path is required");
        };
        let offset = args
            .get("offset")
            .and_then(|v| v.as_u64())
            .map(|v| v.max(1) as usize)
            .unwrap_or(1);
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_LIMIT);

        let resolved = resolve_read_path(path, ctx);
        if !resolved.is_file() {
            return ToolResult::err(format!("not a file: {path}"));
        }

        let ext = resolved
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if !ext.is_empty() && !TEXT_EXTENSIONS.contains(&ext.as_str()) {
            return ToolResult::err(format!(
                "unsupported file type: .{ext}; only text files are supported"
            ));
        }

        let read = tokio::fs::read_to_string(&resolved).await;
        let text = match read {
            Ok(t) => t,
            Err(e) => return ToolResult::err(format!("read failed: {e}")),
        };

        let lines: Vec<&str> = text.lines().collect();
        let total_lines = lines.len();
        let start = (offset - 1).min(total_lines);
        let end = (start + limit).min(total_lines);
        let window = lines[start..end].join("\n");
        let truncated = start > 0 || end < total_lines;

        ToolResult::ok(json!({
            "path": resolved.to_string_lossy(),
            "content": window,
            "total_lines": total_lines,
            "returned_lines": end - start,
            "truncated": truncated,
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
