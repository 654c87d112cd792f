// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use hearth_config::{DataPaths, ToolsConfig};
use hearth_model::ChatBackend;
use hearth_store::MemoryStore;

/// Everything a tool body may need, resolved once per agent run.
///
/// The loop never hands tools its own state; each tool reads only the fields
/// it uses.  Session-scoped paths (scratch, uploads) are derived here so that
/// tool bodies cannot escape their session by construction.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: Option<String>,
    pub username: String,
    pub paths: DataPaths,
    pub tools_cfg: ToolsConfig,
    pub memory: Arc<MemoryStore>,
    /// Backend handle for tools that make their own model calls
    /// (`python_coder` code generation).  `None` in contexts where no backend
    /// is wired, in which case those tools fail cleanly.
    pub backend: Option<Arc<dyn ChatBackend>>,
    /// Model id used for tool-internal model calls.
    pub model: String,
}

impl ToolContext {
    /// Per-session scratch workspace; `anonymous` when no session is bound.
    pub fn scratch_dir(&self) -> PathBuf {
        self.paths
            .scratch_dir
            .join(self.session_id.as_deref().unwrap_or("anonymous"))
    }

    /// The requesting user's upload directory.
    pub fn uploads_dir(&self) -> PathBuf {
        self.paths.uploads_dir.join(&self.username)
    }
}

/// The result of one tool invocation: a JSON object that always carries a
/// boolean `success` and, on failure, a string `error`.  Tools extend it
/// with their own keys.
#[derive(Debug, Clone)]
pub struct ToolResult {
    value: Value,
}

impl ToolResult {
    /// Successful result.  `fields` must be a JSON object; `success: true`
    /// is inserted (overwriting any caller-supplied value).
    pub fn ok(fields: Value) -> Self {
        let mut map = match fields {
            Value::Object(m) => m,
            other => {
                let mut m = Map::new();
                m.insert("data".into(), other);
                m
            }
        };
        map.insert("success".into(), json!(true));
        Self {
            value: Value::Object(map),
        }
    }

    /// Failure carrying only an error message.
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            value: json!({ "success": false, "error": msg.into() }),
        }
    }

    /// Failure with extra structured fields (e.g. the available-collections
    /// list on a bad `rag` call, or partial output on a shell timeout).
    pub fn err_with(msg: impl Into<String>, fields: Value) -> Self {
        let mut map = match fields {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        map.insert("success".into(), json!(false));
        map.insert("error".into(), json!(msg.into()));
        Self {
            value: Value::Object(map),
        }
    }

    pub fn is_success(&self) -> bool {
        self.value["success"].as_bool().unwrap_or(false)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.value["error"].as_str()
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Compact serialization fed back to the model (pre-budget).
    pub fn serialize(&self) -> String {
        self.value.to_string()
    }
}

/// One agent-callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema of the parameters object.  Transport-supplied values
    /// (session id, username) must never appear here — they arrive through
    /// [`ToolContext`].
    fn parameters_schema(&self) -> Value;
    /// Execute the tool.  Failures are expressed as [`ToolResult::err`];
    /// this method itself does not fail.
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResult;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_result_always_carries_success_true() {
        let r = ToolResult::ok(json!({ "count": 3, "success": false }));
        assert!(r.is_success());
        assert_eq!(r.value()["count"], 3);
    }

    #[test]
    fn err_result_carries_message() {
        let r = ToolResult::err("boom");
        assert!(!r.is_success());
        assert_eq!(r.error_message(), Some("boom"));
    }

    #[test]
    fn err_with_preserves_extra_fields() {
        let r = ToolResult::err_with("unknown collection", json!({ "available_collections": [] }));
        assert!(!r.is_success());
        assert!(r.value()["available_collections"].is_array());
    }

    #[test]
    fn non_object_ok_payload_is_wrapped() {
        let r = ToolResult::ok(json!([1, 2, 3]));
        assert!(r.is_success());
        assert_eq!(r.value()["data"][0], 1);
    }

    #[test]
    fn serialize_is_compact_json() {
        let r = ToolResult::ok(json!({ "k": "v" }));
        let s = r.serialize();
        assert!(s.contains("\"success\":true"));
        assert!(!s.contains('\n'));
    }
}
