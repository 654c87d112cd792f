// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in the conversation history.
///
/// The struct is wire-shaped: serializing it produces exactly the JSON object
/// the OpenAI-compatible backend expects, and the same shape is what the
/// session store persists, so history documents stay human-readable and can
/// be replayed verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Set on tool messages: the id of the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on tool messages: the name of the tool that produced the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Assistant message carrying tool calls and no text content.
    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
            name: None,
        }
    }

    /// Tool message answering one call.
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
            name: Some(tool_name.into()),
        }
    }

    /// Approximate token count (4 chars per token heuristic).
    pub fn approx_tokens(&self) -> usize {
        let mut chars = self.content.as_deref().map(str::len).unwrap_or(0);
        if let Some(calls) = &self.tool_calls {
            for c in calls {
                chars += c.name.len() + c.args.to_string().len();
            }
        }
        (chars / 4).max(1)
    }
}

/// One tool invocation requested by the model.
///
/// Serializes to the OpenAI wire shape
/// `{"id", "type": "function", "function": {"name", "arguments": "<json>"}}`;
/// in memory the arguments are kept parsed for direct dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "WireToolCall", into = "WireToolCall")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunction,
}

#[derive(Serialize, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

impl From<WireToolCall> for ToolCall {
    fn from(w: WireToolCall) -> Self {
        // A backend (or an old session document) may carry an arguments
        // string that is not valid JSON.  Keep the raw text under a single
        // `_raw` key instead of failing the whole message parse; the loop
        // surfaces this as a tool failure.
        let args = serde_json::from_str(&w.function.arguments)
            .unwrap_or_else(|_| serde_json::json!({ "_raw": w.function.arguments }));
        Self {
            id: w.id,
            name: w.function.name,
            args,
        }
    }
}

impl From<ToolCall> for WireToolCall {
    fn from(c: ToolCall) -> Self {
        Self {
            id: c.id,
            kind: "function".into(),
            function: WireFunction {
                name: c.name,
                arguments: c.args.to_string(),
            },
        }
    }
}

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: Value,
}

impl ToolSchema {
    /// OpenAI wire form: `{"type": "function", "function": {...}}`.
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Result of one blocking chat call.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

impl LlmResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One event from a streaming chat call.
///
/// Text chunks arrive as they are generated.  Tool-call deltas are
/// accumulated inside the backend client; when the stream terminates with at
/// least one accumulated call, exactly one `ToolCalls` event is emitted last.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Text {
        content: String,
    },
    ToolCalls {
        tool_calls: Vec<ToolCall>,
        finish_reason: Option<String>,
    },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
