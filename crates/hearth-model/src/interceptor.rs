// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Logging decorator for [`ChatBackend`].
//!
//! Every model call — blocking or streaming — is recorded to a rotating,
//! human-readable log file: the full message list on the way in, the response
//! text (or streamed accumulation) and any tool calls on the way out, with
//! timings and token estimates.  A failure to write the log never interrupts
//! the underlying call.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::warn;

use crate::backend::{BackendError, ChatBackend, ChatRequest, EventStream};
use crate::types::{LlmResponse, StreamEvent, ToolCall};

/// Default rotation ceiling: 10 MB.
const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Individual message lines longer than this are clipped in the log.
const LOG_LINE_WIDTH: usize = 200;

/// Response text longer than this is clipped in the log.
const LOG_RESPONSE_CHARS: usize = 2_000;

pub struct PromptLogger {
    path: PathBuf,
    max_bytes: u64,
}

impl PromptLogger {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Append one formatted entry.  All I/O errors are swallowed.
    fn append(&self, text: &str) {
        if let Err(e) = self.try_append(text) {
            warn!(path = %self.path.display(), "prompt log write failed: {e}");
        }
    }

    fn try_append(&self, text: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Rotate when the current file exceeds the ceiling: rename to `.1`
        // (replacing any previous rotation) and start fresh.
        if let Ok(meta) = std::fs::metadata(&self.path) {
            if meta.len() >= self.max_bytes {
                let rotated = self.path.with_extension("log.1");
                let _ = std::fs::rename(&self.path, rotated);
            }
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        f.write_all(text.as_bytes())
    }

    fn log_request(&self, id: &str, req: &ChatRequest, streaming: bool) {
        let mut lines = Vec::new();
        lines.push(String::new());
        lines.push("=".repeat(80));
        lines.push(">>> REQUEST TO LLM".into());
        lines.push("=".repeat(80));
        lines.push(String::new());
        for (i, msg) in req.messages.iter().enumerate() {
            lines.push(format!("Message {}:", i + 1));
            lines.push(format!("  role: {:?}", msg.role).to_lowercase());
            if let Some(content) = &msg.content {
                lines.push("  content:".into());
                for line in content.lines() {
                    lines.push(format!("    {}", clip(line, LOG_LINE_WIDTH)));
                }
            }
            if let Some(calls) = &msg.tool_calls {
                let rendered = serde_json::to_string(calls).unwrap_or_default();
                lines.push(format!("  tool_calls: {}", clip(&rendered, 500)));
            }
            if let Some(tcid) = &msg.tool_call_id {
                lines.push(format!("  tool_call_id: {tcid}"));
            }
            lines.push(String::new());
        }
        if !req.tools.is_empty() {
            lines.push(format!("  [tools: {} schema(s) provided]", req.tools.len()));
            lines.push(String::new());
        }
        lines.extend(self.stats_block(id, req, streaming, None));
        self.append(&lines.join("\n"));
    }

    #[allow(clippy::too_many_arguments)]
    fn log_response(
        &self,
        id: &str,
        req: &ChatRequest,
        streaming: bool,
        text: &str,
        tool_calls: &[ToolCall],
        duration_secs: f64,
        error: Option<&str>,
    ) {
        let mut lines = Vec::new();
        lines.push(String::new());
        lines.push("=".repeat(80));
        lines.push("<<< RESPONSE FROM LLM".into());
        lines.push("=".repeat(80));
        lines.push(String::new());
        lines.push(clip(text, LOG_RESPONSE_CHARS));
        if !tool_calls.is_empty() {
            let rendered = serde_json::to_string(tool_calls).unwrap_or_default();
            lines.push(format!("\n  tool_calls: {}", clip(&rendered, 500)));
        }
        lines.push(String::new());
        lines.extend(self.stats_block(id, req, streaming, Some((text, duration_secs, error))));
        self.append(&lines.join("\n"));
    }

    fn stats_block(
        &self,
        id: &str,
        req: &ChatRequest,
        streaming: bool,
        outcome: Option<(&str, f64, Option<&str>)>,
    ) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push("-".repeat(80));
        lines.push("STATS:".into());
        lines.push(format!("  Id:          {id}"));
        lines.push(format!(
            "  Timestamp:   {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        lines.push(format!("  Model:       {}", req.model));
        lines.push(format!("  Temperature: {}", req.temperature));
        if let Some(sid) = &req.session_id {
            lines.push(format!("  Session:     {sid}"));
        }
        if !req.phase.is_empty() {
            lines.push(format!("  Phase:       {}", req.phase));
        }
        lines.push(format!(
            "  Streaming:   {}",
            if streaming { "Yes" } else { "No" }
        ));
        let input_tokens = estimate_tokens(req);
        match outcome {
            None => {
                lines.push(format!("  Est. input:  {input_tokens} tokens"));
            }
            Some((text, duration, error)) => {
                let output_tokens = text.len() / 4;
                lines.push(format!("  Duration:    {duration:.2}s"));
                lines.push(format!(
                    "  Tokens:      {input_tokens} in + {output_tokens} out = {} total",
                    input_tokens + output_tokens
                ));
                if duration > 0.0 && output_tokens > 0 {
                    lines.push(format!(
                        "  Speed:       {:.1} tokens/sec",
                        output_tokens as f64 / duration
                    ));
                }
                match error {
                    None => lines.push("  Status:      SUCCESS".into()),
                    Some(e) => {
                        lines.push("  Status:      FAILED".into());
                        lines.push(format!("  Error:       {e}"));
                    }
                }
            }
        }
        lines.push("=".repeat(80));
        lines.push(String::new());
        lines
    }
}

fn clip(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let cut = s
            .char_indices()
            .take_while(|(i, _)| *i < max)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &s[..cut])
    }
}

fn estimate_tokens(req: &ChatRequest) -> usize {
    req.messages.iter().map(|m| m.approx_tokens()).sum()
}

fn short_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

/// [`ChatBackend`] decorator that records every call to the prompt log.
pub struct InterceptedBackend {
    inner: Arc<dyn ChatBackend>,
    logger: Arc<PromptLogger>,
}

impl InterceptedBackend {
    pub fn new(inner: Arc<dyn ChatBackend>, logger: Arc<PromptLogger>) -> Self {
        Self { inner, logger }
    }
}

#[async_trait]
impl ChatBackend for InterceptedBackend {
    async fn chat(&self, req: ChatRequest) -> Result<LlmResponse, BackendError> {
        let id = short_id();
        self.logger.log_request(&id, &req, false);
        let start = Instant::now();
        let result = self.inner.chat(req.clone()).await;
        let duration = start.elapsed().as_secs_f64();
        match &result {
            Ok(resp) => self.logger.log_response(
                &id,
                &req,
                false,
                resp.content.as_deref().unwrap_or(""),
                &resp.tool_calls,
                duration,
                None,
            ),
            Err(e) => {
                self.logger
                    .log_response(&id, &req, false, "", &[], duration, Some(&e.to_string()))
            }
        }
        result
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<EventStream, BackendError> {
        let id = short_id();
        self.logger.log_request(&id, &req, true);
        let start = Instant::now();
        let mut inner = match self.inner.chat_stream(req.clone()).await {
            Ok(s) => s,
            Err(e) => {
                self.logger.log_response(
                    &id,
                    &req,
                    true,
                    "",
                    &[],
                    start.elapsed().as_secs_f64(),
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        };

        let logger = Arc::clone(&self.logger);
        let stream: EventStream = Box::pin(async_stream::stream! {
            let mut text = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();
            let mut error: Option<String> = None;
            while let Some(item) = inner.next().await {
                match &item {
                    Ok(StreamEvent::Text { content }) => text.push_str(content),
                    Ok(StreamEvent::ToolCalls { tool_calls: tcs, .. }) => {
                        tool_calls = tcs.clone();
                    }
                    Err(e) => error = Some(e.to_string()),
                }
                yield item;
            }
            logger.log_response(
                &id,
                &req,
                true,
                &text,
                &tool_calls,
                start.elapsed().as_secs_f64(),
                error.as_deref(),
            );
        });
        Ok(stream)
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        self.inner.list_models().await
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChatMessage, ScriptedBackend};

    fn logged_request() -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::user("what is 2+2?")],
            model: "test-model".into(),
            temperature: 0.7,
            session_id: Some("sess-1".into()),
            phase: "agent",
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn blocking_call_writes_request_and_response_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.log");
        let logger = Arc::new(PromptLogger::new(path.clone()));
        let backend = InterceptedBackend::new(
            Arc::new(ScriptedBackend::always_text("4")),
            logger,
        );

        let resp = backend.chat(logged_request()).await.unwrap();
        assert_eq!(resp.content.as_deref(), Some("4"));

        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains(">>> REQUEST TO LLM"));
        assert!(log.contains("<<< RESPONSE FROM LLM"));
        assert!(log.contains("what is 2+2?"));
        assert!(log.contains("Session:     sess-1"));
        assert!(log.contains("Phase:       agent"));
        assert!(log.contains("SUCCESS"));
    }

    #[tokio::test]
    async fn streaming_call_logs_accumulated_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.log");
        let logger = Arc::new(PromptLogger::new(path.clone()));
        let backend = InterceptedBackend::new(
            Arc::new(ScriptedBackend::new(vec![vec![
                StreamEvent::Text { content: "par".into() },
                StreamEvent::Text { content: "tial".into() },
            ]])),
            logger,
        );

        let mut s = backend.chat_stream(logged_request()).await.unwrap();
        while s.next().await.is_some() {}

        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains("partial"));
        assert!(log.contains("Streaming:   Yes"));
    }

    #[tokio::test]
    async fn failed_call_is_logged_and_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.log");
        let logger = Arc::new(PromptLogger::new(path.clone()));
        // Empty queue → every call errors.
        let backend =
            InterceptedBackend::new(Arc::new(ScriptedBackend::new(vec![])), logger);

        assert!(backend.chat(logged_request()).await.is_err());
        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains("FAILED"));
    }

    #[tokio::test]
    async fn unwritable_log_path_does_not_break_the_call() {
        // /proc is not writable; the logger must swallow the error.
        let logger = Arc::new(PromptLogger::new(PathBuf::from("/proc/hearth/prompts.log")));
        let backend = InterceptedBackend::new(
            Arc::new(ScriptedBackend::always_text("still works")),
            logger,
        );
        let resp = backend.chat(logged_request()).await.unwrap();
        assert_eq!(resp.content.as_deref(), Some("still works"));
    }

    #[test]
    fn rotation_renames_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.log");
        let logger = PromptLogger::new(path.clone()).with_max_bytes(64);
        logger.append(&"x".repeat(100));
        logger.append("second entry");
        assert!(path.with_extension("log.1").exists());
        let fresh = std::fs::read_to_string(&path).unwrap();
        assert!(fresh.contains("second entry"));
        assert!(!fresh.contains("xxxx"));
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("short", 10), "short");
        let clipped = clip(&"é".repeat(100), 10);
        assert!(clipped.ends_with("..."));
    }
}
