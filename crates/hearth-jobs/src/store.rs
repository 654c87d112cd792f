// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Persisted background-job records.
//!
//! Each job is one JSON document under `data/jobs/`, guarded by a per-job
//! lock file.  Only the runner writes after creation; status and tail readers
//! take the lock briefly per snapshot.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use hearth_model::ChatMessage;
use hearth_store::{atomic_write, FileLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEventRecord {
    pub tool: String,
    pub status: String,
    pub duration: f64,
    pub at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub username: String,
    pub session_id: String,
    pub status: JobStatus,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub messages: Vec<ChatMessage>,
    pub output_chunks: Vec<String>,
    pub tool_events: Vec<ToolEventRecord>,
    pub error: Option<String>,
}

impl JobRecord {
    pub fn output_text(&self) -> String {
        self.output_chunks.concat()
    }
}

#[derive(Clone)]
pub struct JobStore {
    jobs_dir: PathBuf,
}

impl JobStore {
    pub fn new(jobs_dir: impl Into<PathBuf>) -> Self {
        let jobs_dir = jobs_dir.into();
        let _ = std::fs::create_dir_all(&jobs_dir);
        Self { jobs_dir }
    }

    fn job_file(&self, job_id: &str) -> PathBuf {
        self.jobs_dir.join(format!("{job_id}.json"))
    }

    fn lock_file(&self, job_id: &str) -> PathBuf {
        self.jobs_dir.join(format!("{job_id}.lock"))
    }

    /// Write the initial record with status `pending`.
    pub fn create(
        &self,
        job_id: &str,
        username: &str,
        session_id: &str,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: f32,
    ) -> std::io::Result<JobRecord> {
        let record = JobRecord {
            job_id: job_id.to_string(),
            username: username.to_string(),
            session_id: session_id.to_string(),
            status: JobStatus::Pending,
            created_at: Utc::now().to_rfc3339(),
            started_at: None,
            completed_at: None,
            model: model.to_string(),
            temperature,
            messages,
            output_chunks: Vec::new(),
            tool_events: Vec::new(),
            error: None,
        };
        let _guard = FileLock::acquire(&self.lock_file(job_id))?;
        self.write_unlocked(&record)?;
        Ok(record)
    }

    pub fn load(&self, job_id: &str) -> Option<JobRecord> {
        let path = self.job_file(job_id);
        if !path.exists() {
            return None;
        }
        let _guard = FileLock::acquire(&self.lock_file(job_id)).ok()?;
        let text = std::fs::read_to_string(&path).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Status transition with timestamp stamping.  `running` stamps
    /// `started_at` once; terminal states stamp `completed_at`.
    pub fn update_status(&self, job_id: &str, status: JobStatus, error: Option<&str>) {
        self.mutate(job_id, |record| {
            record.status = status;
            let now = Utc::now().to_rfc3339();
            if status == JobStatus::Running && record.started_at.is_none() {
                record.started_at = Some(now.clone());
            }
            if status.is_terminal() {
                record.completed_at = Some(now);
            }
            if let Some(e) = error {
                record.error = Some(e.to_string());
            }
        });
    }

    pub fn append_chunk(&self, job_id: &str, text: &str) {
        self.mutate(job_id, |record| {
            record.output_chunks.push(text.to_string());
        });
    }

    pub fn append_tool_event(&self, job_id: &str, tool: &str, status: &str, duration: f64) {
        self.mutate(job_id, |record| {
            record.tool_events.push(ToolEventRecord {
                tool: tool.to_string(),
                status: status.to_string(),
                duration,
                at: Utc::now().to_rfc3339(),
            });
        });
    }

    /// Metadata-only listing for one user, newest first.  Chunks are dropped
    /// and replaced by their total length.
    pub fn list_jobs(&self, username: &str) -> Vec<Value> {
        let mut jobs: Vec<JobRecord> = self
            .job_ids()
            .into_iter()
            .filter_map(|id| self.load(&id))
            .filter(|j| j.username == username)
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.iter().map(strip_output).collect()
    }

    pub fn delete(&self, job_id: &str) -> bool {
        let existed = self.job_file(job_id).exists();
        let _ = std::fs::remove_file(self.job_file(job_id));
        let _ = std::fs::remove_file(self.lock_file(job_id));
        existed
    }

    /// Startup sweep: drop job documents older than `max_age_days`.
    pub fn gc(&self, max_age_days: i64) -> usize {
        let cutoff = Utc::now() - Duration::days(max_age_days);
        let mut removed = 0;
        for id in self.job_ids() {
            let Some(record) = self.load(&id) else { continue };
            let created = DateTime::parse_from_rfc3339(&record.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            if created < cutoff {
                self.delete(&id);
                removed += 1;
            }
        }
        if removed > 0 {
            info!(count = removed, "swept old job records");
        }
        removed
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    fn job_ids(&self) -> Vec<String> {
        std::fs::read_dir(&self.jobs_dir)
            .map(|rd| {
                rd.flatten()
                    .filter_map(|e| {
                        let name = e.file_name().into_string().ok()?;
                        name.strip_suffix(".json").map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn mutate(&self, job_id: &str, f: impl FnOnce(&mut JobRecord)) {
        let Ok(_guard) = FileLock::acquire(&self.lock_file(job_id)) else {
            warn!(job_id, "cannot lock job record");
            return;
        };
        let path = self.job_file(job_id);
        let Some(mut record) = std::fs::read_to_string(&path)
            .ok()
            .and_then(|t| serde_json::from_str::<JobRecord>(&t).ok())
        else {
            return;
        };
        f(&mut record);
        if let Err(e) = self.write_unlocked(&record) {
            warn!(job_id, "cannot write job record: {e}");
        }
    }

    fn write_unlocked(&self, record: &JobRecord) -> std::io::Result<()> {
        let text = serde_json::to_string_pretty(record)?;
        atomic_write(&self.job_file(&record.job_id), &text)
    }
}

fn strip_output(record: &JobRecord) -> Value {
    json!({
        "job_id": record.job_id,
        "username": record.username,
        "session_id": record.session_id,
        "status": record.status,
        "created_at": record.created_at,
        "started_at": record.started_at,
        "completed_at": record.completed_at,
        "model": record.model,
        "temperature": record.temperature,
        "output_length": record.output_chunks.iter().map(String::len).sum::<usize>(),
        "tool_events": record.tool_events.len(),
        "error": record.error,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, JobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path().join("jobs"));
        (dir, store)
    }

    fn create(store: &JobStore, id: &str) -> JobRecord {
        store
            .create(
                id,
                "alice",
                "sess-1",
                vec![ChatMessage::user("do the thing")],
                "test-model",
                0.7,
            )
            .unwrap()
    }

    #[test]
    fn create_writes_pending_record() {
        let (_dir, store) = store();
        let record = create(&store, "job-1");
        assert_eq!(record.status, JobStatus::Pending);
        let loaded = store.load("job-1").unwrap();
        assert_eq!(loaded.username, "alice");
        assert!(loaded.started_at.is_none());
        assert!(loaded.output_chunks.is_empty());
    }

    #[test]
    fn load_missing_job_is_none() {
        let (_dir, store) = store();
        assert!(store.load("ghost").is_none());
    }

    #[test]
    fn running_stamps_started_at_once() {
        let (_dir, store) = store();
        create(&store, "job-1");
        store.update_status("job-1", JobStatus::Running, None);
        let first = store.load("job-1").unwrap().started_at.unwrap();
        store.update_status("job-1", JobStatus::Running, None);
        assert_eq!(store.load("job-1").unwrap().started_at.unwrap(), first);
    }

    #[test]
    fn terminal_status_stamps_completed_at_and_error() {
        let (_dir, store) = store();
        create(&store, "job-1");
        store.update_status("job-1", JobStatus::Failed, Some("backend down"));
        let record = store.load("job-1").unwrap();
        assert!(record.status.is_terminal());
        assert!(record.completed_at.is_some());
        assert_eq!(record.error.as_deref(), Some("backend down"));
    }

    #[test]
    fn chunks_and_tool_events_append_in_order() {
        let (_dir, store) = store();
        create(&store, "job-1");
        store.append_chunk("job-1", "Hello ");
        store.append_chunk("job-1", "world");
        store.append_tool_event("job-1", "shell_exec", "started", 0.0);
        store.append_tool_event("job-1", "shell_exec", "completed", 1.5);
        let record = store.load("job-1").unwrap();
        assert_eq!(record.output_text(), "Hello world");
        assert_eq!(record.tool_events.len(), 2);
        assert_eq!(record.tool_events[1].status, "completed");
    }

    #[test]
    fn listing_is_per_user_and_strips_chunks() {
        let (_dir, store) = store();
        create(&store, "job-a");
        store.append_chunk("job-a", "0123456789");
        store
            .create("job-b", "bob", "sess-2", vec![], "m", 0.1)
            .unwrap();
        let jobs = store.list_jobs("alice");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0]["job_id"], "job-a");
        assert_eq!(jobs[0]["output_length"], 10);
        assert!(jobs[0].get("output_chunks").is_none());
    }

    #[test]
    fn delete_removes_doc_and_lock() {
        let (_dir, store) = store();
        create(&store, "job-1");
        assert!(store.delete("job-1"));
        assert!(store.load("job-1").is_none());
        assert!(!store.delete("job-1"));
        assert!(!store.jobs_dir().join("job-1.lock").exists());
    }

    #[test]
    fn gc_removes_only_old_jobs() {
        let (_dir, store) = store();
        create(&store, "fresh");
        create(&store, "old");
        store.mutate("old", |r| {
            r.created_at = (Utc::now() - Duration::days(30)).to_rfc3339();
        });
        let removed = store.gc(7);
        assert_eq!(removed, 1);
        assert!(store.load("old").is_none());
        assert!(store.load("fresh").is_some());
    }
}
