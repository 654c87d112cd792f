// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Client for an OpenAI-compatible chat completions server (llama.cpp, vLLM,
//! LM Studio).  One struct speaks both the blocking and the SSE streaming
//! variant of `POST /chat/completions`, plus `GET /models`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::backend::{BackendError, ChatBackend, ChatRequest, EventStream};
use crate::types::{LlmResponse, StreamEvent, ToolCall};

pub struct LlamaBackend {
    chat_url: String,
    models_url: String,
    client: reqwest::Client,
}

impl LlamaBackend {
    /// `base_url` ends before `/chat/completions`, e.g. `http://127.0.0.1:8081/v1`.
    pub fn new(base_url: &str, request_timeout: Duration) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            chat_url: format!("{base}/chat/completions"),
            models_url: format!("{base}/models"),
            client: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn from_config(cfg: &hearth_config::BackendConfig) -> Self {
        Self::new(&cfg.base_url, Duration::from_secs(cfg.request_timeout_secs))
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": req.model,
            "messages": req.messages,
            "temperature": req.temperature,
            "stream": stream,
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(|t| t.to_wire()).collect();
            body["tools"] = json!(tools);
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, BackendError> {
        let resp = self
            .client
            .post(&self.chat_url)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::Unavailable(format!("{status}: {text}")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::Protocol(format!("{status}: {text}")));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatBackend for LlamaBackend {
    async fn chat(&self, req: ChatRequest) -> Result<LlmResponse, BackendError> {
        let body = self.build_body(&req, false);
        debug!(
            model = %req.model,
            messages = req.messages.len(),
            tools = req.tools.len(),
            "chat completion request"
        );
        let resp = self.post(&body).await?;
        let v: Value = resp
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        parse_blocking_response(&v)
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<EventStream, BackendError> {
        let body = self.build_body(&req, true);
        debug!(
            model = %req.model,
            messages = req.messages.len(),
            tools = req.tools.len(),
            "chat completion request (stream)"
        );
        let resp = self.post(&body).await?;
        let mut bytes = resp.bytes_stream();

        let stream: EventStream = Box::pin(async_stream::try_stream! {
            // SSE events can be split across TCP packets.  Keep a line buffer
            // across chunks; only complete `\n`-terminated lines are parsed.
            let mut buf = String::new();
            // One accumulator per parallel-tool-call index.  The backend
            // interleaves deltas for different calls by index; name and
            // arguments fragments are concatenated per slot.
            let mut pending: HashMap<u32, PendingToolCall> = HashMap::new();
            let mut finish_reason: Option<String> = None;
            let mut done = false;

            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| BackendError::Unavailable(e.to_string()))?;
                buf.push_str(&String::from_utf8_lossy(&chunk));
                for raw in drain_complete_sse_lines(&mut buf) {
                    match raw {
                        RawEvent::TextDelta(t) if !t.is_empty() => {
                            yield StreamEvent::Text { content: t };
                        }
                        RawEvent::TextDelta(_) => {}
                        RawEvent::ToolCallDelta { index, id, name, arguments } => {
                            let slot = pending.entry(index).or_default();
                            if !id.is_empty() {
                                slot.id = id;
                            }
                            slot.name.push_str(&name);
                            slot.args_buf.push_str(&arguments);
                        }
                        RawEvent::FinishReason(r) => finish_reason = Some(r),
                        RawEvent::Done => {
                            done = true;
                        }
                    }
                }
                if done {
                    break;
                }
            }

            if !pending.is_empty() {
                let mut sorted: Vec<(u32, PendingToolCall)> = pending.into_iter().collect();
                sorted.sort_by_key(|(idx, _)| *idx);
                let tool_calls: Vec<ToolCall> =
                    sorted.into_iter().map(|(_, p)| p.finish()).collect();
                yield StreamEvent::ToolCalls { tool_calls, finish_reason };
            }
        });

        Ok(stream)
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let resp = self
            .client
            .get(&self.models_url)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "models endpoint returned {}",
                resp.status()
            )));
        }
        let v: Value = resp
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        let ids = v["data"]
            .as_array()
            .ok_or_else(|| BackendError::Protocol("missing data array".into()))?
            .iter()
            .filter_map(|m| m["id"].as_str().map(str::to_string))
            .collect();
        Ok(ids)
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(&self.models_url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

/// Parse the body of a non-streaming chat completion.
fn parse_blocking_response(v: &Value) -> Result<LlmResponse, BackendError> {
    let choice = v["choices"]
        .get(0)
        .ok_or_else(|| BackendError::Protocol("response has no choices".into()))?;
    let message = &choice["message"];
    if !message.is_object() {
        return Err(BackendError::Protocol("choice has no message".into()));
    }

    let content = message["content"].as_str().map(str::to_string);
    let tool_calls = match message.get("tool_calls").and_then(|t| t.as_array()) {
        Some(arr) => arr
            .iter()
            .map(|tc| {
                serde_json::from_value::<ToolCall>(tc.clone())
                    .map_err(|e| BackendError::Protocol(format!("bad tool call: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    let finish_reason = choice["finish_reason"].as_str().map(str::to_string);

    Ok(LlmResponse {
        content,
        tool_calls,
        finish_reason,
    })
}

/// A streaming chunk decoded to its useful payload.
#[derive(Debug)]
enum RawEvent {
    TextDelta(String),
    ToolCallDelta {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    FinishReason(String),
    Done,
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingToolCall {
    fn finish(self) -> ToolCall {
        // The accumulated arguments string must parse as a JSON object.  When
        // it does not (truncated stream, model glitch), pass the raw text
        // through under `_raw` — the dispatcher will reject it as a tool
        // failure, which the loop feeds back to the model.
        let args = if self.args_buf.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&self.args_buf)
                .unwrap_or_else(|_| json!({ "_raw": self.args_buf }))
        };
        ToolCall {
            id: self.id,
            name: self.name,
            args,
        }
    }
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line is left in `buf` so it can be extended by the
/// next TCP chunk.
fn drain_complete_sse_lines(buf: &mut String) -> Vec<RawEvent> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        events.extend(parse_sse_data_line(&line));
    }
    events
}

/// Decode a single complete SSE `data:` line into zero or more events.
///
/// A chunk can carry both a delta and a finish reason, so this returns a list.
fn parse_sse_data_line(line: &str) -> Vec<RawEvent> {
    let Some(data) = line.strip_prefix("data: ").map(str::trim) else {
        return Vec::new();
    };
    if data.is_empty() {
        return Vec::new();
    }
    if data == "[DONE]" {
        return vec![RawEvent::Done];
    }
    let Ok(v) = serde_json::from_str::<Value>(data) else {
        return Vec::new();
    };

    let mut events = Vec::new();
    let choice = &v["choices"][0];

    if let Some(tool_calls) = choice["delta"].get("tool_calls").and_then(|t| t.as_array()) {
        for tc in tool_calls {
            events.push(RawEvent::ToolCallDelta {
                index: tc["index"].as_u64().unwrap_or(0) as u32,
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: tc["function"]["arguments"]
                    .as_str()
                    .unwrap_or("")
                    .to_string(),
            });
        }
    } else if let Some(text) = choice["delta"].get("content").and_then(|c| c.as_str()) {
        events.push(RawEvent::TextDelta(text.to_string()));
    }

    // If several chunks carry a finish reason, the most recent one seen wins.
    if let Some(reason) = choice["finish_reason"].as_str() {
        events.push(RawEvent::FinishReason(reason.to_string()));
    }

    events
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
