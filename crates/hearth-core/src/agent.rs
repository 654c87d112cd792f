// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The agent loop: bounded alternation of model calls and tool batches.
//!
//! One [`AgentLoop`] instance is bound to a backend, a session, a user and an
//! enabled tool subset.  The blocking and streaming entry points share one
//! implementation; streaming differs only in that model text is re-emitted
//! chunk by chunk and tool dispatches are bracketed by status events.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use hearth_model::{
    BackendError, ChatBackend, ChatMessage, ChatRequest, Role, StreamEvent, ToolCall, ToolSchema,
};
use hearth_tools::{apply_budget, list_collections, ToolContext, ToolRegistry, ToolResult};

use crate::compress::compress_old_iterations;
use crate::events::{AgentEvent, ToolStatus};
use crate::prompts::{assemble_system_prompt, AttachmentMeta};
use crate::stop::StopSignal;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The process-wide stop flag was set, or the run was aborted.
    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Per-run parameters resolved by the orchestrator.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub model: String,
    pub temperature: f32,
    pub max_iterations: u32,
    pub compress_threshold_chars: usize,
    /// `None` enables the full catalog.
    pub enabled_tools: Option<Vec<String>>,
}

pub struct AgentLoop {
    backend: Arc<dyn ChatBackend>,
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    stop: StopSignal,
    params: RunParams,
    /// Schema list frozen at construction; its order is part of the
    /// byte-stable request prefix.
    schemas: Vec<ToolSchema>,
    messages: Vec<ChatMessage>,
    /// Start offset of each iteration in `messages`, for compression.
    iteration_starts: Vec<usize>,
    /// RAG collection names of the bound user; fetched on first use.
    rag_collections: Option<Vec<String>>,
}

impl AgentLoop {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        tools: Arc<ToolRegistry>,
        ctx: ToolContext,
        stop: StopSignal,
        params: RunParams,
    ) -> Self {
        let schemas = tools.schemas(params.enabled_tools.as_deref());
        Self {
            backend,
            tools,
            ctx,
            stop,
            params,
            schemas,
            messages: Vec::new(),
            iteration_starts: Vec::new(),
            rag_collections: None,
        }
    }

    /// Blocking run: returns the final reply text.
    pub async fn run(
        &mut self,
        messages: Vec<ChatMessage>,
        attachments: Vec<AttachmentMeta>,
    ) -> Result<String, AgentError> {
        self.run_inner(messages, attachments, None).await
    }

    /// Streaming run: events flow through `tx` as they happen; the final
    /// reply text is also returned for history persistence.
    pub async fn run_stream(
        &mut self,
        messages: Vec<ChatMessage>,
        attachments: Vec<AttachmentMeta>,
        tx: mpsc::Sender<AgentEvent>,
    ) -> Result<String, AgentError> {
        self.run_inner(messages, attachments, Some(tx)).await
    }

    /// The conversation as the loop last saw it (system prompt included).
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Tool-calling iterations executed in the last run.
    pub fn iterations(&self) -> usize {
        self.iteration_starts.len()
    }

    async fn run_inner(
        &mut self,
        incoming: Vec<ChatMessage>,
        attachments: Vec<AttachmentMeta>,
        tx: Option<mpsc::Sender<AgentEvent>>,
    ) -> Result<String, AgentError> {
        // Checked before any backend or tool work so a pre-set flag aborts
        // without side effects.
        self.stop.check()?;

        self.seed_messages(incoming, &attachments);

        let mut full_text = String::new();
        for iteration in 0..self.params.max_iterations {
            self.stop.check()?;
            let boundary = self.messages.len();
            self.iteration_starts.push(boundary);

            let (text, tool_calls) = self.one_model_call(&tx, true).await?;
            if !text.is_empty() {
                full_text.push_str(&text);
            }

            if tool_calls.is_empty() {
                debug!(iteration, "model answered in text; run complete");
                return Ok(full_text);
            }

            debug!(iteration, calls = tool_calls.len(), "dispatching tool batch");
            self.messages
                .push(ChatMessage::assistant_tool_calls(tool_calls.clone()));

            let results = self.dispatch_batch(&tool_calls, &tx).await;

            // Tool messages are appended in the order of the calls in the
            // assistant message, regardless of completion order.
            for (call, result) in tool_calls.iter().zip(results) {
                let budget = self.ctx.tools_cfg.budget_for(&call.name);
                let outcome = apply_budget(
                    &result,
                    budget,
                    self.ctx.session_id.as_deref(),
                    &self.ctx.paths.tool_results_dir,
                );
                self.messages.push(ChatMessage::tool_result(
                    &call.id,
                    &call.name,
                    outcome.serialized,
                ));
            }

            compress_old_iterations(
                &mut self.messages,
                boundary,
                self.params.compress_threshold_chars,
            );
        }

        // Iteration cap reached: one final tool-less call forces termination.
        self.stop.check()?;
        warn!(
            max_iterations = self.params.max_iterations,
            "iteration cap reached; forcing a tool-less final call"
        );
        let (text, _) = self.one_model_call(&tx, false).await?;
        full_text.push_str(&text);
        Ok(full_text)
    }

    /// Replace the working list with system prompt + incoming conversation.
    fn seed_messages(&mut self, incoming: Vec<ChatMessage>, attachments: &[AttachmentMeta]) {
        let rag_enabled = self.schemas.iter().any(|s| s.name == "rag");
        let collections = if rag_enabled {
            Some(self.collections().to_vec())
        } else {
            None
        };
        let memory_section = self.ctx.memory.format_for_prompt(&self.ctx.username);
        let system =
            assemble_system_prompt(collections.as_deref(), attachments, &memory_section);

        self.messages.clear();
        self.iteration_starts.clear();
        self.messages.push(ChatMessage::system(system));
        // Any caller-supplied system message is dropped: the assembled prompt
        // is the single source of the stable prefix.
        self.messages
            .extend(incoming.into_iter().filter(|m| m.role != Role::System));
    }

    /// One model call, streamed or blocking.  Returns (text, tool_calls).
    async fn one_model_call(
        &mut self,
        tx: &Option<mpsc::Sender<AgentEvent>>,
        with_tools: bool,
    ) -> Result<(String, Vec<ToolCall>), AgentError> {
        let phase = match (tx.is_some(), with_tools) {
            (true, true) => "agent:stream",
            (true, false) => "agent:stream:final",
            (false, true) => "agent",
            (false, false) => "agent:final",
        };
        let req = ChatRequest {
            messages: self.messages.clone(),
            model: self.params.model.clone(),
            temperature: self.params.temperature,
            tools: if with_tools {
                self.schemas.clone()
            } else {
                Vec::new()
            },
            session_id: self.ctx.session_id.clone(),
            phase,
        };

        match tx {
            Some(tx) => {
                let mut stream = self.backend.chat_stream(req).await?;
                let mut text = String::new();
                let mut tool_calls = Vec::new();
                while let Some(event) = stream.next().await {
                    match event? {
                        StreamEvent::Text { content } => {
                            text.push_str(&content);
                            let _ = tx.send(AgentEvent::Text(content)).await;
                        }
                        StreamEvent::ToolCalls {
                            tool_calls: calls, ..
                        } => tool_calls = calls,
                    }
                }
                Ok((text, tool_calls))
            }
            None => {
                let resp = self.backend.chat(req).await?;
                Ok((resp.content.unwrap_or_default(), resp.tool_calls))
            }
        }
    }

    /// Execute one tool batch concurrently.
    ///
    /// "Started" events are emitted in the model's call order before any
    /// dispatch begins; "completed"/"failed" events are emitted as each call
    /// actually finishes.  The returned results are in input order.
    async fn dispatch_batch(
        &mut self,
        calls: &[ToolCall],
        tx: &Option<mpsc::Sender<AgentEvent>>,
    ) -> Vec<ToolResult> {
        for call in calls {
            emit(
                tx,
                AgentEvent::ToolStatus {
                    tool_name: call.name.clone(),
                    tool_call_id: call.id.clone(),
                    status: ToolStatus::Started,
                    duration: None,
                },
            )
            .await;
        }

        let mut results: Vec<Option<ToolResult>> = (0..calls.len()).map(|_| None).collect();
        let mut running = FuturesUnordered::new();

        for (i, call) in calls.iter().enumerate() {
            // Enforced here rather than in the tool body: an invalid
            // collection must not reach the tool at all.
            if let Some(rejection) = self.rag_precheck(call) {
                emit(
                    tx,
                    AgentEvent::ToolStatus {
                        tool_name: call.name.clone(),
                        tool_call_id: call.id.clone(),
                        status: ToolStatus::Failed,
                        duration: Some(0.0),
                    },
                )
                .await;
                results[i] = Some(rejection);
                continue;
            }

            let registry = Arc::clone(&self.tools);
            let ctx = self.ctx.clone();
            let (name, args) = (call.name.clone(), call.args.clone());
            // tokio::spawn isolates the batch from a panicking tool body.
            let handle = tokio::spawn(async move {
                let start = Instant::now();
                let result = registry.dispatch(&name, &args, &ctx).await;
                (result, start.elapsed().as_secs_f64())
            });
            running.push(async move { (i, handle.await) });
        }

        while let Some((i, joined)) = running.next().await {
            let (result, duration) = match joined {
                Ok(pair) => pair,
                Err(e) => (ToolResult::err(format!("tool panicked: {e}")), 0.0),
            };
            emit(
                tx,
                AgentEvent::ToolStatus {
                    tool_name: calls[i].name.clone(),
                    tool_call_id: calls[i].id.clone(),
                    status: if result.is_success() {
                        ToolStatus::Completed
                    } else {
                        ToolStatus::Failed
                    },
                    duration: Some(duration),
                },
            )
            .await;
            results[i] = Some(result);
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| ToolResult::err("tool result missing")))
            .collect()
    }

    /// Loop-level validation for `rag` calls: the collection must exist and
    /// belong to the current user.  Returns the failure result to feed back
    /// when the call must not be dispatched.
    fn rag_precheck(&mut self, call: &ToolCall) -> Option<ToolResult> {
        if call.name != "rag" {
            return None;
        }
        let collections = self.collections().to_vec();
        match call.args.get("collection_name").and_then(|v| v.as_str()) {
            Some(name) if collections.iter().any(|c| c == name) => None,
            Some(name) => Some(ToolResult::err_with(
                format!("unknown collection: {name}"),
                json!({ "available_collections": collections }),
            )),
            None => Some(ToolResult::err_with(
                "collection_name is required",
                json!({ "available_collections": collections }),
            )),
        }
    }

    fn collections(&mut self) -> &[String] {
        if self.rag_collections.is_none() {
            self.rag_collections = Some(list_collections(
                &self.ctx.paths.rag_dir,
                &self.ctx.username,
            ));
        }
        self.rag_collections.as_deref().unwrap_or(&[])
    }
}

async fn emit(tx: &Option<mpsc::Sender<AgentEvent>>, event: AgentEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event).await;
    }
}
