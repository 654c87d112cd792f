// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;

use crate::backend::{BackendError, ChatBackend, ChatRequest, EventStream};
use crate::types::{LlmResponse, StreamEvent, ToolCall};

/// Pre-scripted backend for deterministic agent-loop tests.
///
/// Each call to `chat` / `chat_stream` pops the next script from the front of
/// the queue; every request is recorded so tests can inspect exactly what the
/// loop sent.  The `tool_call_forever` constructor builds a backend that
/// answers every tool-enabled request with the same tool call and every
/// tool-less request with a fixed text — the shape needed to exercise the
/// iteration cap.
pub struct ScriptedBackend {
    mode: Mode,
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
}

enum Mode {
    Queue(Mutex<VecDeque<Vec<StreamEvent>>>),
    ToolCallForever {
        name: String,
        args: Value,
        final_text: String,
    },
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            mode: Mode::Queue(Mutex::new(scripts.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Backend that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![vec![StreamEvent::Text {
            content: reply.into(),
        }]])
    }

    /// Backend scripted for one tool round: first call returns the given tool
    /// call, second call returns the final text.
    pub fn tool_then_text(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![StreamEvent::ToolCalls {
                tool_calls: vec![ToolCall {
                    id: call_id.into(),
                    name: tool_name.into(),
                    args,
                }],
                finish_reason: Some("tool_calls".into()),
            }],
            vec![StreamEvent::Text {
                content: final_text.into(),
            }],
        ])
    }

    /// Backend that emits the same tool call on every tool-enabled request
    /// and `final_text` once tools are withheld.  Call ids are
    /// `call_0`, `call_1`, … in request order.
    pub fn tool_call_forever(
        tool_name: impl Into<String>,
        args: Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self {
            mode: Mode::ToolCallForever {
                name: tool_name.into(),
                args,
                final_text: final_text.into(),
            },
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of chat calls made so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_script(&self, req: &ChatRequest) -> Result<Vec<StreamEvent>, BackendError> {
        let call_index = {
            let mut reqs = self.requests.lock().unwrap();
            reqs.push(req.clone());
            reqs.len() - 1
        };
        match &self.mode {
            Mode::Queue(q) => q
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| BackendError::Unavailable("script queue exhausted".into())),
            Mode::ToolCallForever {
                name,
                args,
                final_text,
            } => {
                if req.tools.is_empty() {
                    Ok(vec![StreamEvent::Text {
                        content: final_text.clone(),
                    }])
                } else {
                    Ok(vec![StreamEvent::ToolCalls {
                        tool_calls: vec![ToolCall {
                            id: format!("call_{call_index}"),
                            name: name.clone(),
                            args: args.clone(),
                        }],
                        finish_reason: Some("tool_calls".into()),
                    }])
                }
            }
        }
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn chat(&self, req: ChatRequest) -> Result<LlmResponse, BackendError> {
        let events = self.next_script(&req)?;
        let mut resp = LlmResponse::default();
        let mut text = String::new();
        for ev in events {
            match ev {
                StreamEvent::Text { content } => text.push_str(&content),
                StreamEvent::ToolCalls {
                    tool_calls,
                    finish_reason,
                } => {
                    resp.tool_calls = tool_calls;
                    resp.finish_reason = finish_reason;
                }
            }
        }
        if !text.is_empty() {
            resp.content = Some(text);
        }
        Ok(resp)
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<EventStream, BackendError> {
        let events: Vec<Result<StreamEvent, BackendError>> =
            self.next_script(&req)?.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(events)))
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        Ok(vec!["scripted-mock".into()])
    }

    async fn is_available(&self) -> bool {
        true
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
