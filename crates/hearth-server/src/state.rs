// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use hearth_config::{Config, DataPaths};
use hearth_core::{AgentLoop, RunParams, StopSignal};
use hearth_jobs::{JobRunner, JobStore};
use hearth_model::ChatBackend;
use hearth_store::{Database, HistoryStore, MemoryStore};
use hearth_tools::{ToolContext, ToolRegistry};

/// Shared server state: one of everything, built at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub paths: DataPaths,
    pub backend: Arc<dyn ChatBackend>,
    pub registry: Arc<ToolRegistry>,
    pub db: Database,
    pub history: Arc<HistoryStore>,
    pub memory: Arc<MemoryStore>,
    pub jobs: Arc<JobStore>,
    pub runner: JobRunner,
    pub stop: StopSignal,
}

impl AppState {
    /// Tool context bound to one session and user.
    pub fn tool_context(&self, session_id: Option<String>, username: &str, model: &str) -> ToolContext {
        ToolContext {
            session_id,
            username: username.to_string(),
            paths: self.paths.clone(),
            tools_cfg: self.config.tools.clone(),
            memory: Arc::clone(&self.memory),
            backend: Some(Arc::clone(&self.backend)),
            model: model.to_string(),
        }
    }

    /// Build an agent loop for one run.
    pub fn agent_loop(
        &self,
        session_id: &str,
        username: &str,
        model: &str,
        temperature: f32,
        enabled_tools: Option<Vec<String>>,
    ) -> AgentLoop {
        AgentLoop::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.registry),
            self.tool_context(Some(session_id.to_string()), username, model),
            self.stop.clone(),
            RunParams {
                model: model.to_string(),
                temperature,
                max_iterations: self.config.agent.max_iterations,
                compress_threshold_chars: self.config.agent.compress_threshold_chars,
                enabled_tools,
            },
        )
    }
}
