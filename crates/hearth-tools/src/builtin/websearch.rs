// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolContext, ToolResult};

const DEFAULT_MAX_RESULTS: u64 = 5;
const MAX_RESULTS_CEILING: u64 = 10;

/// Real-time web search via the Brave Search API.
pub struct WebSearchTool {
    /// Key from config; falls back to the `SEARCH_API_KEY` env var.
    pub api_key: Option<String>,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "websearch"
    }

    fn description(&self) -> &str {
        "Search the web. Returns results with title, url, content snippet and a \
         relevance score. Use for anything that may have changed after your \
         training data, and cite the sources you used."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Number of results (default 5, max 10)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResult {
        let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
            return ToolResult::err("query is required");
        };
        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .min(MAX_RESULTS_CEILING);

        let api_key = self
            .api_key
            .clone()
            .or_else(|| ctx.tools_cfg.websearch_api_key.clone())
            .or_else(|| std::env::var("SEARCH_API_KEY").ok());
        let Some(api_key) = api_key else {
            return ToolResult::err(
                "no search provider key configured; set tools.websearch_api_key or the \
                 SEARCH_API_KEY environment variable",
            );
        };

        debug!(query = %query, max_results, "websearch");
        match search(query, max_results, &api_key).await {
            Ok(results) => ToolResult::ok(json!({
                "query": query,
                "count": results.len(),
                "results": results,
            })),
            Err(e) => ToolResult::err(format!("search provider error: {e}")),
        }
    }
}

async fn search(query: &str, count: u64, api_key: &str) -> anyhow::Result<Vec<Value>> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(15))
        .build()?;
    let resp = client
        .get("https://api.search.brave.com/res/v1/web/search")
        .query(&[("q", query), ("count", &count.to_string())])
        .header("X-Subscription-Token", api_key)
        .header("Accept", "application/json")
        .send()
        .await?;
    if !resp.status().is_success() {
        anyhow::bail!("provider returned {}", resp.status());
    }
    let body: Value = resp.json().await?;
    let results = body["web"]["results"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .take(count as usize)
                .enumerate()
                .map(|(i, r)| {
                    json!({
                        "title": r["title"].as_str().unwrap_or(""),
                        "url": r["url"].as_str().unwrap_or(""),
                        "content": r["description"].as_str().unwrap_or(""),
                        // Rank-derived relevance: the provider orders results
                        // but does not expose a score.
                        "score": 1.0 / (i as f64 + 1.0),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(results)
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
            session_id: None,
            username: "alice".into(),
            paths: config.paths(),
            tools_cfg: config.tools.clone(),
            memory: Arc::new(hearth_store::MemoryStore::new(dir.join("memory"), 10, 100)),
            backend: None,
            model: "test".into(),
        }
    }

    #[tokio::test]
    async fn missing_query_fails() {
        let dir = tempfile::tempdir().unwrap();
        let t = WebSearchTool { api_key: None };
        let out = t.execute(&json!({}), &ctx(dir.path())).await;
        assert!(!out.is_success());
        assert!(out.error_message().unwrap().contains("query"));
    }

    #[tokio::test]
    async fn missing_key_fails_with_hint() {
        let dir = tempfile::tempdir().unwrap();
        // Ensure the env fallback is not set in the test environment.
        std::env::remove_var("SEARCH_API_KEY");
        let t = WebSearchTool { api_key: None };
        let out = t
            .execute(&json!({ "query": "rust agents" }), &ctx(dir.path()))
            .await;
        assert!(!out.is_success());
        assert!(out.error_message().unwrap().contains("SEARCH_API_KEY"));
    }

    #[test]
    fn schema_marks_only_query_required() {
        let t = WebSearchTool { api_key: None };
        let schema = t.parameters_schema();
        assert_eq!(schema["required"], json!(["query"]));
    }
}
