// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use hearth_model::ToolSchema;

use crate::builtin;
use crate::tool::{Tool, ToolContext, ToolResult};

/// Central registry holding the tool catalog.
///
/// Tools are kept in **registration order**, and `schemas` preserves it.
/// The order is part of the byte-stable request prefix the backend uses for
/// attention-cache reuse, so it must never depend on hash iteration or
/// alphabetical sorting.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.push(Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    /// Canonical-order names of all registered tools.
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// Schemas for the enabled subset, in canonical order.  `None` enables
    /// everything.
    pub fn schemas(&self, enabled: Option<&[String]>) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .filter(|t| match enabled {
                None => true,
                Some(subset) => subset.iter().any(|n| n == t.name()),
            })
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Route one call to its tool.  An unknown name becomes a failure result,
    /// never an error — the model sees it and can correct itself.
    pub async fn dispatch(&self, name: &str, args: &Value, ctx: &ToolContext) -> ToolResult {
        match self.get(name) {
            Some(tool) => {
                debug!(tool = name, "dispatching tool call");
                tool.execute(args, ctx).await
            }
            None => ToolResult::err(format!("unknown tool: {name}")),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the full catalog in its canonical order.
///
/// This order is frozen: it feeds the schema list sent with every request,
/// and reordering it would invalidate the backend's prompt cache for every
/// stored session.
pub fn standard_registry(cfg: &hearth_config::ToolsConfig) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(builtin::websearch::WebSearchTool {
        api_key: cfg.websearch_api_key.clone(),
    });
    reg.register(builtin::python_coder::PythonCoderTool {
        timeout_secs: cfg.python_timeout_secs,
    });
    reg.register(builtin::rag::RagTool);
    reg.register(builtin::file_reader::FileReaderTool);
    reg.register(builtin::file_writer::FileWriterTool);
    reg.register(builtin::file_navigator::FileNavigatorTool);
    reg.register(builtin::shell_exec::ShellExecTool {
        timeout_secs: cfg.shell_timeout_secs,
    });
    reg.register(builtin::memory::MemoryTool);
    reg
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    struct EchoTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, args: &Value, _ctx: &ToolContext) -> ToolResult {
            ToolResult::ok(json!({ "echo": args }))
        }
    }

    fn test_ctx() -> ToolContext {
        let dir = std::env::temp_dir().join("hearth-registry-test");
        let mut config = hearth_config::Config::default();
        config.data_dir = dir.clone();
        ToolContext {
            session_id: None,
            username: "tester".into(),
            paths: config.paths(),
            tools_cfg: config.tools.clone(),
            memory: std::sync::Arc::new(hearth_store::MemoryStore::new(
                dir.join("memory"),
                10,
                100,
            )),
            backend: None,
            model: "test".into(),
        }
    }

    #[test]
    fn canonical_order_is_registration_order() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "zulu" });
        reg.register(EchoTool { name: "alpha" });
        assert_eq!(reg.names(), vec!["zulu", "alpha"]);
        let schemas = reg.schemas(None);
        assert_eq!(schemas[0].name, "zulu");
        assert_eq!(schemas[1].name, "alpha");
    }

    #[test]
    fn enabled_subset_filters_but_keeps_order() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "a" });
        reg.register(EchoTool { name: "b" });
        reg.register(EchoTool { name: "c" });
        let enabled = vec!["c".to_string(), "a".to_string()];
        let schemas = reg.schemas(Some(&enabled));
        let names: Vec<_> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_failure_result() {
        let reg = ToolRegistry::new();
        let out = reg.dispatch("missing", &json!({}), &test_ctx()).await;
        assert!(!out.is_success());
        assert!(out.error_message().unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn dispatch_routes_by_name() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let out = reg.dispatch("echo", &json!({ "x": 1 }), &test_ctx()).await;
        assert!(out.is_success());
        assert_eq!(out.value()["echo"]["x"], 1);
    }

    #[test]
    fn standard_registry_has_the_eight_tools_in_order() {
        let reg = standard_registry(&hearth_config::ToolsConfig::default());
        assert_eq!(
            reg.names(),
            vec![
                "websearch",
                "python_coder",
                "rag",
                "file_reader",
                "file_writer",
                "file_navigator",
                "shell_exec",
                "memory",
            ]
        );
    }

    #[test]
    fn schemas_never_mention_session_or_username() {
        let reg = standard_registry(&hearth_config::ToolsConfig::default());
        for schema in reg.schemas(None) {
            let text = schema.parameters.to_string();
            assert!(
                !text.contains("session_id") && !text.contains("username"),
                "transport parameter leaked into schema for {}",
                schema.name
            );
        }
    }
}
