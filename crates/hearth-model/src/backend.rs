// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::{ChatMessage, LlmResponse, StreamEvent, ToolSchema};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, BackendError>> + Send>>;

#[derive(Debug, Error)]
pub enum BackendError {
    /// The inference server could not be reached, or answered with a server
    /// error.  Chat calls surface this as 503; job runners record it and fail
    /// the job.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The server answered, but the body did not match the expected
    /// chat-completions shape.
    #[error("backend protocol error: {0}")]
    Protocol(String),
}

/// One chat call to the inference backend.
///
/// `session_id` and `phase` are observability metadata consumed by the
/// interceptor; they are never sent over the wire.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub tools: Vec<ToolSchema>,
    pub session_id: Option<String>,
    /// Agent-phase tag for the prompt log (e.g. `agent`, `agent:stream`,
    /// `agent:stream:final`).
    pub phase: &'static str,
}

/// The inference backend seam.
///
/// `LlamaBackend` is the production implementation; `InterceptedBackend`
/// wraps any implementation with prompt logging; `ScriptedBackend` replaces
/// it in tests.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Single blocking completion.
    async fn chat(&self, req: ChatRequest) -> Result<LlmResponse, BackendError>;

    /// Streaming completion.  Text chunks are yielded as they arrive; if the
    /// model issued tool calls, exactly one terminal
    /// [`StreamEvent::ToolCalls`] follows the last text chunk.
    async fn chat_stream(&self, req: ChatRequest) -> Result<EventStream, BackendError>;

    /// Model ids known to the backend.
    async fn list_models(&self) -> Result<Vec<String>, BackendError>;

    /// Cheap reachability probe.
    async fn is_available(&self) -> bool;
}
