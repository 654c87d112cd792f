// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub(crate) mod llama;
mod backend;
mod interceptor;
mod mock;
mod types;

pub use backend::{BackendError, ChatBackend, ChatRequest, EventStream};
pub use interceptor::{InterceptedBackend, PromptLogger};
pub use llama::LlamaBackend;
pub use mock::ScriptedBackend;
pub use types::{ChatMessage, LlmResponse, Role, StreamEvent, ToolCall, ToolSchema};
