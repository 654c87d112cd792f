// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Background execution of agent runs.
//!
//! The runner consumes the agent's event stream, persisting text chunks and
//! tool events incrementally so a tail client sees progress while the job
//! runs.  On normal completion the accumulated text is appended to the bound
//! session's history as one assistant turn; cancellation and failure leave
//! the history untouched.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hearth_core::{AgentError, AgentEvent, AgentLoop, AttachmentMeta};
use hearth_model::ChatMessage;
use hearth_store::{Database, HistoryStore};

use crate::store::{JobStatus, JobStore};

#[derive(Clone)]
pub struct JobRunner {
    store: Arc<JobStore>,
    db: Database,
    history: Arc<HistoryStore>,
    running: Arc<DashMap<String, CancellationToken>>,
}

enum Outcome {
    Completed,
    Failed(String),
    Cancelled,
}

impl JobRunner {
    pub fn new(store: Arc<JobStore>, db: Database, history: Arc<HistoryStore>) -> Self {
        Self {
            store,
            db,
            history,
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.running.contains_key(job_id)
    }

    /// Ask a running job to abort at its next yield point.  Returns `false`
    /// when the job is not running (finished or unknown).
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.running.get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Spawn the runner task for a freshly created job record.
    pub fn spawn(
        &self,
        job_id: String,
        mut agent: AgentLoop,
        messages: Vec<ChatMessage>,
        attachments: Vec<AttachmentMeta>,
    ) {
        let token = CancellationToken::new();
        self.running.insert(job_id.clone(), token.clone());

        let store = Arc::clone(&self.store);
        let db = self.db.clone();
        let history = Arc::clone(&self.history);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            store.update_status(&job_id, JobStatus::Running, None);
            info!(job_id, "job started");

            let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
            let mut agent_fut = Box::pin(agent.run_stream(messages, attachments, tx));

            // When the sender is dropped the run is about to return; stop
            // polling the closed channel and wait on the future alone.
            let mut rx_open = true;
            let outcome = loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break Outcome::Cancelled,
                    result = &mut agent_fut => break result_to_outcome(result),
                    event = rx.recv(), if rx_open => match event {
                        Some(event) => persist_event(&store, &job_id, event),
                        None => rx_open = false,
                    },
                }
            };

            // Persist whatever was still buffered in the channel.
            while let Ok(event) = rx.try_recv() {
                persist_event(&store, &job_id, event);
            }

            match outcome {
                Outcome::Completed => {
                    store.update_status(&job_id, JobStatus::Completed, None);
                    if let Some(record) = store.load(&job_id) {
                        append_history(&db, &history, &record.session_id, record.output_text())
                            .await;
                    }
                    info!(job_id, "job completed");
                }
                Outcome::Failed(error) => {
                    store.update_status(&job_id, JobStatus::Failed, Some(&error));
                    warn!(job_id, error, "job failed");
                }
                Outcome::Cancelled => {
                    store.update_status(&job_id, JobStatus::Cancelled, None);
                    info!(job_id, "job cancelled");
                }
            }

            running.remove(&job_id);
        });
    }
}

fn result_to_outcome(result: Result<String, AgentError>) -> Outcome {
    match result {
        Ok(_) => Outcome::Completed,
        Err(AgentError::Cancelled) => Outcome::Cancelled,
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

fn persist_event(store: &JobStore, job_id: &str, event: AgentEvent) {
    match event {
        AgentEvent::Text(chunk) => store.append_chunk(job_id, &chunk),
        AgentEvent::ToolStatus {
            tool_name,
            status,
            duration,
            ..
        } => store.append_tool_event(job_id, &tool_name, status.as_str(), duration.unwrap_or(0.0)),
    }
}

/// Append the job's reply to its session as one assistant turn.
async fn append_history(db: &Database, history: &HistoryStore, session_id: &str, text: String) {
    let mut messages = match history.load_messages(session_id).await {
        Ok(m) => m,
        Err(e) => {
            warn!(session_id, "cannot load history for job result: {e}");
            return;
        }
    };
    messages.push(ChatMessage::assistant(text));
    if let Err(e) = history.save_messages(session_id, &messages).await {
        warn!(session_id, "cannot save history for job result: {e}");
        return;
    }
    if let Err(e) = db.update_message_count(session_id, messages.len()).await {
        warn!(session_id, "cannot update message count: {e}");
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use hearth_core::{RunParams, StopSignal};
    use hearth_model::ScriptedBackend;
    use hearth_tools::{standard_registry, ToolContext};

    use super::*;

    struct JobEnv {
        _dir: tempfile::TempDir,
        runner: JobRunner,
        store: Arc<JobStore>,
        db: Database,
        history: Arc<HistoryStore>,
        ctx: ToolContext,
        stop: StopSignal,
    }

    async fn job_env() -> JobEnv {
        let dir = tempfile::tempdir().unwrap();
        let mut config = hearth_config::Config::default();
        config.data_dir = dir.path().to_path_buf();
        let paths = config.paths();
        paths.ensure_dirs().unwrap();

        let store = Arc::new(JobStore::new(paths.jobs_dir.clone()));
        let db = Database::open_in_memory().unwrap();
        let history = Arc::new(HistoryStore::new(paths.sessions_dir.clone()));
        let runner = JobRunner::new(Arc::clone(&store), db.clone(), Arc::clone(&history));
        let ctx = ToolContext {
            session_id: Some("sess-job".into()),
            username: "alice".into(),
            paths: paths.clone(),
            tools_cfg: config.tools.clone(),
            memory: Arc::new(hearth_store::MemoryStore::new(
                paths.memory_dir.clone(),
                100,
                2000,
            )),
            backend: None,
            model: "test-model".into(),
        };
        let stop = StopSignal::new(dir.path().join("STOP"));
        JobEnv {
            _dir: dir,
            runner,
            store,
            db,
            history,
            ctx,
            stop,
        }
    }

    fn agent_for(env: &JobEnv, backend: ScriptedBackend) -> AgentLoop {
        hearth_core::init_prompt_cache(None);
        AgentLoop::new(
            Arc::new(backend),
            Arc::new(standard_registry(&env.ctx.tools_cfg)),
            env.ctx.clone(),
            env.stop.clone(),
            RunParams {
                model: "test-model".into(),
                temperature: 0.2,
                max_iterations: 8,
                compress_threshold_chars: 200,
                enabled_tools: None,
            },
        )
    }

    async fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn job_completes_and_appends_history() {
        let env = job_env().await;
        env.db.create_session("sess-job", "alice").await.unwrap();
        env.history
            .save_messages("sess-job", &[ChatMessage::user("count to 3")])
            .await
            .unwrap();
        env.store
            .create(
                "job-1",
                "alice",
                "sess-job",
                vec![ChatMessage::user("count to 3")],
                "test-model",
                0.2,
            )
            .unwrap();

        let agent = agent_for(
            &env,
            ScriptedBackend::tool_then_text(
                "call_1",
                "memory",
                json!({ "operation": "set", "key": "n", "value": "3" }),
                "1 2 3",
            ),
        );
        env.runner.spawn(
            "job-1".into(),
            agent,
            vec![ChatMessage::user("count to 3")],
            vec![],
        );

        assert!(
            wait_for(
                || env
                    .store
                    .load("job-1")
                    .map(|j| j.status == JobStatus::Completed)
                    .unwrap_or(false),
                Duration::from_secs(10),
            )
            .await
        );

        let record = env.store.load("job-1").unwrap();
        assert_eq!(record.output_text(), "1 2 3");
        assert!(record.started_at.is_some());
        assert!(record.completed_at.is_some());
        assert_eq!(record.tool_events.len(), 2);

        // History gained the assistant turn; count matches the stored list.
        let messages = env.history.load_messages("sess-job").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content.as_deref(), Some("1 2 3"));
        let meta = env.db.get_session("sess-job").await.unwrap().unwrap();
        assert_eq!(meta.message_count, 2);
        assert!(!env.runner.is_running("job-1"));
    }

    #[tokio::test]
    async fn cancelled_job_leaves_history_untouched() {
        let env = job_env().await;
        env.db.create_session("sess-job", "alice").await.unwrap();
        env.history
            .save_messages("sess-job", &[ChatMessage::user("long task")])
            .await
            .unwrap();
        env.store
            .create("job-2", "alice", "sess-job", vec![], "test-model", 0.2)
            .unwrap();

        // Every iteration runs a slow shell call, so the job spans many yield
        // points where cancellation can land.
        let agent = agent_for(
            &env,
            ScriptedBackend::tool_call_forever(
                "shell_exec",
                json!({ "command": "sleep 0.3; echo tick" }),
                "never reached",
            ),
        );
        env.runner
            .spawn("job-2".into(), agent, vec![ChatMessage::user("long task")], vec![]);

        // Wait until it is demonstrably running, then cancel.
        assert!(
            wait_for(
                || env
                    .store
                    .load("job-2")
                    .map(|j| !j.tool_events.is_empty())
                    .unwrap_or(false),
                Duration::from_secs(10),
            )
            .await
        );
        assert!(env.runner.cancel("job-2"));

        assert!(
            wait_for(
                || env
                    .store
                    .load("job-2")
                    .map(|j| j.status == JobStatus::Cancelled)
                    .unwrap_or(false),
                Duration::from_secs(10),
            )
            .await
        );

        // Only what was emitted before the cancel is recorded, and the
        // session history was not extended.
        let messages = env.history.load_messages("sess-job").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(!env.runner.is_running("job-2"));
    }

    #[tokio::test]
    async fn backend_failure_fails_the_job() {
        let env = job_env().await;
        env.store
            .create("job-3", "alice", "sess-job", vec![], "test-model", 0.2)
            .unwrap();
        // Empty script queue: the first call errors as unavailable.
        let agent = agent_for(&env, ScriptedBackend::new(vec![]));
        env.runner
            .spawn("job-3".into(), agent, vec![ChatMessage::user("x")], vec![]);

        assert!(
            wait_for(
                || env
                    .store
                    .load("job-3")
                    .map(|j| j.status == JobStatus::Failed)
                    .unwrap_or(false),
                Duration::from_secs(10),
            )
            .await
        );
        let record = env.store.load("job-3").unwrap();
        assert!(record.error.unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn cancel_unknown_job_returns_false() {
        let env = job_env().await;
        assert!(!env.runner.cancel("ghost"));
    }
}
