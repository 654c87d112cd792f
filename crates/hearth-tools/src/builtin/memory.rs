// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolContext, ToolResult};

/// Persistent per-user key-value memory.
///
/// Entries survive across sessions and are injected into the system prompt,
/// so anything stored here is visible to future conversations.
pub struct MemoryTool;

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "memory"
    }

    fn description(&self) -> &str {
        "Persistent key-value memory that survives across conversations.\n\
         Use 'set' to save a fact, 'get' to recall one, 'list' to see all saved \
         entries, 'delete' to remove one. Saved entries are automatically shown \
         to you at the start of every conversation with this user."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["set", "get", "list", "delete"],
                    "description": "What to do"
                },
                "key": {
                    "type": "string",
                    "description": "Entry key (required for set/get/delete)"
                },
                "value": {
                    "type": "string",
                    "description": "Entry value (required for set)"
                }
            },
            "required": ["operation"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResult {
        let Some(operation) = args.get("operation").and_then(|v| v.as_str()) else {
            return ToolResult::err("operation is required (set/get/list/delete)");
        };
        let key = args.get("key").and_then(|v| v.as_str());
        let value = args.get("value").and_then(|v| v.as_str());
        let user = ctx.username.as_str();

        // `write`/`read` are accepted as aliases; older prompts used them.
        match operation {
            "set" | "write" => {
                let Some(key) = key else {
                    return ToolResult::err("key is required for set operation");
                };
                let Some(value) = value else {
                    return ToolResult::err("value is required for set operation");
                };
                match ctx.memory.set(user, key, value) {
                    Ok(()) => ToolResult::ok(json!({ "key": key.trim(), "written": true })),
                    Err(e) => ToolResult::err(e.to_string()),
                }
            }
            "get" | "read" => {
                let Some(key) = key else {
                    return ToolResult::err("key is required for get operation");
                };
                match ctx.memory.get(user, key) {
                    Ok(entry) => ToolResult::ok(json!({
                        "key": key.trim(),
                        "value": entry.value,
                        "updated_at": entry.updated_at,
                    })),
                    Err(e) => ToolResult::err(e.to_string()),
                }
            }
            "list" => match ctx.memory.list(user) {
                Ok(entries) => {
                    let rendered: Vec<Value> = entries
                        .iter()
                        .map(|(k, e)| {
                            json!({ "key": k, "value": e.value, "updated_at": e.updated_at })
                        })
                        .collect();
                    ToolResult::ok(json!({ "entries": rendered, "count": rendered.len() }))
                }
                Err(e) => ToolResult::err(e.to_string()),
            },
            "delete" => {
                let Some(key) = key else {
                    return ToolResult::err("key is required for delete operation");
                };
                match ctx.memory.delete(user, key) {
                    Ok(()) => ToolResult::ok(json!({ "key": key.trim(), "deleted": true })),
                    Err(e) => ToolResult::err(e.to_string()),
                }
            }
            other => ToolResult::err(format!(
                "unknown operation: {other}. Use set/get/list/delete."
            )),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
