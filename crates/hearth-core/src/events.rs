// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Events emitted by the agent during one run.
///
/// Consumers (the SSE chat stream, the job runner) subscribe to these to
/// drive their output.  Text chunks arrive exactly as the model streamed
/// them; tool-status events bracket each tool dispatch.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the model.
    Text(String),
    /// A tool call changed state.
    ToolStatus {
        tool_name: String,
        tool_call_id: String,
        status: ToolStatus,
        /// Seconds from dispatch to completion; `None` for `Started`.
        duration: Option<f64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Started,
    Completed,
    Failed,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ToolStatus::Started).unwrap(), "\"started\"");
        assert_eq!(ToolStatus::Failed.as_str(), "failed");
    }
}
