// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Background job endpoints.
//!
//! Submission accepts the same multipart form as a chat turn and returns
//! immediately with 202; clients poll `GET /api/jobs/{id}` or tail
//! `GET /api/jobs/{id}/stream`.  DELETE cancels a running job, or removes a
//! finished record.

use std::time::Duration;

use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use hearth_core::AttachmentMeta;
use hearth_jobs::JobRecord;
use hearth_model::{ChatMessage, Role};

use crate::auth;
use crate::error::ApiError;
use crate::state::AppState;
use crate::uploads::save_upload;

/// Poll interval for the tail stream.
const TAIL_POLL: Duration = Duration::from_millis(500);

/// Auto-generated session titles keep this many chars of the user message.
const TITLE_CHARS: usize = 60;

pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let username = auth::current_user(&headers, &state)?;

    let mut raw_messages: Option<String> = None;
    let mut model: Option<String> = None;
    let mut temperature: Option<f32> = None;
    let mut session_id: Option<String> = None;
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or("") {
            "messages" => raw_messages = Some(text(field).await?),
            "model" => model = Some(text(field).await?),
            "temperature" => {
                let raw = text(field).await?;
                temperature = Some(
                    raw.parse()
                        .map_err(|_| ApiError::Validation(format!("invalid temperature: {raw}")))?,
                );
            }
            "session_id" => session_id = Some(text(field).await?),
            "files" => {
                let name = field.file_name().unwrap_or("upload.bin").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("upload read failed: {e}")))?;
                files.push((name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let raw_messages =
        raw_messages.ok_or_else(|| ApiError::Validation("messages field is required".into()))?;
    let incoming: Vec<ChatMessage> = serde_json::from_str(&raw_messages)
        .map_err(|_| ApiError::Validation("invalid messages JSON".into()))?;
    if incoming.is_empty() {
        return Err(ApiError::Validation("messages must not be empty".into()));
    }

    let model = model.unwrap_or_else(|| state.config.backend.default_model.clone());
    let temperature = temperature.unwrap_or(state.config.backend.default_temperature);

    // Resolve or create the bound session; new sessions get an automatic
    // title derived from the user message.
    let (session_id, mut history) = match session_id {
        Some(id) => {
            state
                .db
                .get_session(&id)
                .await?
                .ok_or_else(|| ApiError::NotFound("session not found".into()))?;
            let mut history = state.history.load_messages(&id).await?;
            history.extend(incoming.iter().cloned());
            (id, history)
        }
        None => {
            let id = Uuid::new_v4().to_string();
            state.db.create_session(&id, &username).await?;
            if let Some(first_user) = incoming
                .iter()
                .find(|m| m.role == Role::User)
                .and_then(|m| m.content.as_deref())
            {
                let title: String = first_user.chars().take(TITLE_CHARS).collect();
                state.db.set_title(&id, &title).await?;
            }
            (id, incoming.clone())
        }
    };

    let mut attachments: Vec<AttachmentMeta> = Vec::new();
    for (file_name, bytes) in &files {
        match save_upload(
            &state.paths.uploads_dir,
            &username,
            &session_id,
            file_name,
            bytes,
        ) {
            Ok((_, meta)) => attachments.push(meta),
            Err(e) => warn!(file_name, "upload failed: {e}"),
        }
    }

    // The user turn is persisted up front; the runner appends the assistant
    // turn only on normal completion.
    state.history.save_messages(&session_id, &history).await?;
    state
        .db
        .update_message_count(&session_id, history.len())
        .await?;

    let job_id = Uuid::new_v4().to_string();
    state
        .jobs
        .create(
            &job_id,
            &username,
            &session_id,
            incoming,
            &model,
            temperature,
        )
        .map_err(|e| ApiError::Internal(format!("cannot create job record: {e}")))?;

    let agent = state.agent_loop(&session_id, &username, &model, temperature, None);
    state
        .runner
        .spawn(job_id.clone(), agent, history, attachments);
    debug!(job_id, session_id, username, "job submitted");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": job_id,
            "session_id": session_id,
            "status": "pending",
        })),
    )
        .into_response())
}

async fn text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed field: {e}")))
}

/// `GET /api/jobs` — metadata-only listing for the requesting user.
pub async fn list_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let username = auth::current_user(&headers, &state)?;
    let jobs = state.jobs.list_jobs(&username);
    Ok(Json(json!({ "jobs": jobs })))
}

fn owned_job(state: &AppState, job_id: &str, username: &str) -> Result<JobRecord, ApiError> {
    let record = state
        .jobs
        .load(job_id)
        .ok_or_else(|| ApiError::NotFound("job not found".into()))?;
    if record.username != username && record.username != auth::GUEST_USER {
        return Err(ApiError::AccessDenied("not your job".into()));
    }
    Ok(record)
}

/// `GET /api/jobs/{id}` — status plus full output and tool events.
pub async fn get_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let username = auth::current_user(&headers, &state)?;
    let record = owned_job(&state, &job_id, &username)?;
    Ok(Json(json!({
        "job_id": record.job_id,
        "session_id": record.session_id,
        "status": record.status,
        "created_at": record.created_at,
        "started_at": record.started_at,
        "completed_at": record.completed_at,
        "model": record.model,
        "output": record.output_text(),
        "tool_events": record.tool_events,
        "error": record.error,
    })))
}

/// `DELETE /api/jobs/{id}` — cancel a running job; remove a finished one.
/// Cancelling an already-finished job is a no-op reporting its status.
pub async fn cancel_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let username = auth::current_user(&headers, &state)?;
    let record = owned_job(&state, &job_id, &username)?;

    if state.runner.cancel(&job_id) {
        return Ok(Json(json!({ "job_id": job_id, "status": "cancelling" })));
    }
    if record.status.is_terminal() {
        state.jobs.delete(&job_id);
        return Ok(Json(json!({
            "job_id": job_id,
            "status": record.status,
            "deleted": true,
        })));
    }
    // Pending but not yet tracked by the runner: report current status.
    Ok(Json(json!({ "job_id": job_id, "status": record.status })))
}

/// `GET /api/jobs/{id}/stream` — SSE tail of a job's output.
///
/// Emits chunks and tool events as they are appended, then a final status
/// frame and `[DONE]` once the job reaches a terminal state.
pub async fn stream_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let username = auth::current_user(&headers, &state)?;
    owned_job(&state, &job_id, &username)?;

    let jobs = state.jobs.clone();
    let stream = async_stream::stream! {
        let mut chunk_idx = 0usize;
        let mut event_idx = 0usize;
        loop {
            let Some(record) = jobs.load(&job_id) else {
                let gone = json!({ "error": { "message": "job deleted", "type": "not_found" } });
                yield Ok::<_, std::convert::Infallible>(Event::default().data(gone.to_string()));
                break;
            };

            for chunk in &record.output_chunks[chunk_idx.min(record.output_chunks.len())..] {
                let frame = json!({ "type": "chunk", "content": chunk });
                yield Ok(Event::default().data(frame.to_string()));
            }
            chunk_idx = record.output_chunks.len();

            for event in &record.tool_events[event_idx.min(record.tool_events.len())..] {
                let frame = json!({
                    "type": "tool",
                    "tool": event.tool,
                    "status": event.status,
                    "duration": event.duration,
                });
                yield Ok(Event::default().data(frame.to_string()));
            }
            event_idx = record.tool_events.len();

            if record.status.is_terminal() {
                let frame = json!({
                    "type": "status",
                    "status": record.status,
                    "error": record.error,
                });
                yield Ok(Event::default().data(frame.to_string()));
                yield Ok(Event::default().data("[DONE]"));
                break;
            }
            tokio::time::sleep(TAIL_POLL).await;
        }
    };

    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::app_state;

    #[tokio::test]
    async fn get_unknown_job_is_404() {
        let state = app_state();
        let result = get_job(State(state), HeaderMap::new(), Path("ghost".into())).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn foreign_job_is_denied() {
        let state = app_state();
        state
            .jobs
            .create("job-x", "bob", "sess", vec![], "m", 0.1)
            .unwrap();
        let result = get_job(State(state), HeaderMap::new(), Path("job-x".into())).await;
        assert!(matches!(result, Err(ApiError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn cancel_of_finished_job_reports_status_and_deletes() {
        let state = app_state();
        state
            .jobs
            .create("job-y", "guest", "sess", vec![], "m", 0.1)
            .unwrap();
        state
            .jobs
            .update_status("job-y", hearth_jobs::JobStatus::Completed, None);

        let resp = cancel_job(
            State(state.clone()),
            HeaderMap::new(),
            Path("job-y".into()),
        )
        .await
        .unwrap();
        assert_eq!(resp.0["status"], "completed");
        assert_eq!(resp.0["deleted"], true);
        assert!(state.jobs.load("job-y").is_none());
    }

    #[tokio::test]
    async fn listing_shows_only_own_jobs() {
        let state = app_state();
        state
            .jobs
            .create("mine", "guest", "s1", vec![], "m", 0.1)
            .unwrap();
        state
            .jobs
            .create("theirs", "bob", "s2", vec![], "m", 0.1)
            .unwrap();
        let resp = list_jobs(State(state), HeaderMap::new()).await.unwrap();
        let jobs = resp.0["jobs"].as_array().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0]["job_id"], "mine");
    }
}
