// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The chat completions endpoint (OpenAI-compatible, with extensions).
//!
//! Both streaming and non-streaming requests run through the agent loop.
//! The request body is a multipart form so file attachments travel with the
//! messages; responses carry the non-standard `x_session_id` field so
//! clients can continue the conversation.

use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use hearth_core::{AgentEvent, AttachmentMeta};
use hearth_model::ChatMessage;

use crate::auth;
use crate::error::ApiError;
use crate::state::AppState;
use crate::uploads::save_upload;

#[derive(Default)]
struct ChatForm {
    messages: Option<String>,
    stream: bool,
    model: Option<String>,
    temperature: Option<f32>,
    session_id: Option<String>,
    files: Vec<(String, Vec<u8>)>,
}

async fn parse_form(mut multipart: Multipart) -> Result<ChatForm, ApiError> {
    let mut form = ChatForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "messages" => form.messages = Some(read_text(field).await?),
            "stream" => form.stream = read_text(field).await?.eq_ignore_ascii_case("true"),
            "model" => form.model = Some(read_text(field).await?),
            "temperature" => {
                let raw = read_text(field).await?;
                form.temperature = Some(
                    raw.parse()
                        .map_err(|_| ApiError::Validation(format!("invalid temperature: {raw}")))?,
                );
            }
            "session_id" => form.session_id = Some(read_text(field).await?),
            "files" => {
                let file_name = field.file_name().unwrap_or("upload.bin").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("upload read failed: {e}")))?;
                form.files.push((file_name, bytes.to_vec()));
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed field: {e}")))
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let username = auth::current_user(&headers, &state)?;
    let form = parse_form(multipart).await?;

    let raw_messages = form
        .messages
        .ok_or_else(|| ApiError::Validation("messages field is required".into()))?;
    let incoming: Vec<ChatMessage> = serde_json::from_str(&raw_messages)
        .map_err(|_| ApiError::Validation("invalid messages JSON".into()))?;
    if incoming.is_empty() {
        return Err(ApiError::Validation("messages must not be empty".into()));
    }

    let model = form
        .model
        .unwrap_or_else(|| state.config.backend.default_model.clone());
    let temperature = form
        .temperature
        .unwrap_or(state.config.backend.default_temperature);

    // Resolve or create the session and load prior turns.
    let (session_id, mut history) = match &form.session_id {
        Some(id) => {
            state
                .db
                .get_session(id)
                .await?
                .ok_or_else(|| ApiError::NotFound("session not found".into()))?;
            let mut history = state.history.load_messages(id).await?;
            history.extend(incoming.iter().cloned());
            (id.clone(), history)
        }
        None => {
            let id = Uuid::new_v4().to_string();
            state.db.create_session(&id, &username).await?;
            (id, incoming.clone())
        }
    };

    // Persist uploads and collect their structure hints.
    let mut attachments: Vec<AttachmentMeta> = Vec::new();
    for (file_name, bytes) in &form.files {
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

    let request_id = format!("chatcmpl-{}", &Uuid::new_v4().simple().to_string()[..8]);
    let created = chrono::Utc::now().timestamp();
    let agent = state.agent_loop(&session_id, &username, &model, temperature, None);

    debug!(
        session_id,
        username,
        model,
        streaming = form.stream,
        attachments = attachments.len(),
        "chat request"
    );

    if form.stream {
        Ok(stream_response(
            state,
            agent,
            history,
            attachments,
            StreamMeta {
                request_id,
                created,
                model,
                session_id,
            },
        ))
    } else {
        let mut agent = agent;
        let reply = agent.run(history.clone(), attachments).await?;

        history.push(ChatMessage::assistant(&reply));
        state.history.save_messages(&session_id, &history).await?;
        state
            .db
            .update_message_count(&session_id, history.len())
            .await?;

        Ok(Json(ChatCompletionResponse {
            id: request_id,
            object: "chat.completion",
            created,
            model,
            choices: vec![Choice {
                index: 0,
                message: MessagePayload {
                    role: "assistant",
                    content: reply,
                },
                finish_reason: "stop",
            }],
            x_session_id: session_id,
        })
        .into_response())
    }
}

struct StreamMeta {
    request_id: String,
    created: i64,
    model: String,
    session_id: String,
}

/// Run the agent in a background task and translate its events into SSE
/// chunks.  History is appended once the run completes successfully; a
/// failed or cancelled run leaves it untouched.
fn stream_response(
    state: AppState,
    agent: hearth_core::AgentLoop,
    history: Vec<ChatMessage>,
    attachments: Vec<AttachmentMeta>,
    meta: StreamMeta,
) -> Response {
    let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
    let (done_tx, done_rx) = oneshot::channel::<Result<(), String>>();

    {
        let state = state.clone();
        let session_id = meta.session_id.clone();
        let agent_input = history.clone();
        let mut agent = agent;
        let mut history = history;
        tokio::spawn(async move {
            let outcome = match agent.run_stream(agent_input, attachments, tx).await {
                Ok(reply) => {
                    history.push(ChatMessage::assistant(&reply));
                    let saved = state.history.save_messages(&session_id, &history).await;
                    let counted = state
                        .db
                        .update_message_count(&session_id, history.len())
                        .await;
                    match (saved, counted) {
                        (Ok(()), Ok(())) => Ok(()),
                        (Err(e), _) => Err(format!("history save failed: {e}")),
                        (_, Err(e)) => Err(format!("session update failed: {e}")),
                    }
                }
                Err(e) => Err(ApiError::from(e).to_string()),
            };
            let _ = done_tx.send(outcome);
        });
    }

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let payload = match event {
                AgentEvent::Text(content) => json!(ChunkPayload {
                    id: meta.request_id.clone(),
                    object: "chat.completion.chunk",
                    created: meta.created,
                    model: meta.model.clone(),
                    choices: vec![ChunkChoice {
                        index: 0,
                        delta: Delta { content: Some(content) },
                        finish_reason: None,
                    }],
                    x_session_id: None,
                }),
                AgentEvent::ToolStatus {
                    tool_name,
                    tool_call_id,
                    status,
                    duration,
                } => json!({
                    "object": "tool.status",
                    "tool_name": tool_name,
                    "tool_call_id": tool_call_id,
                    "status": status.as_str(),
                    "duration": duration,
                }),
            };
            yield Ok::<_, std::convert::Infallible>(Event::default().data(payload.to_string()));
        }

        match done_rx.await {
            Ok(Ok(())) => {
                // Final empty delta carrying the session id, then the
                // end-of-stream sentinel.
                let final_chunk = json!(ChunkPayload {
                    id: meta.request_id.clone(),
                    object: "chat.completion.chunk",
                    created: meta.created,
                    model: meta.model.clone(),
                    choices: vec![ChunkChoice {
                        index: 0,
                        delta: Delta { content: None },
                        finish_reason: Some("stop"),
                    }],
                    x_session_id: Some(meta.session_id.clone()),
                });
                yield Ok(Event::default().data(final_chunk.to_string()));
                yield Ok(Event::default().data("[DONE]"));
            }
            Ok(Err(message)) => {
                let error = json!({ "error": { "message": message, "type": "internal_error" } });
                yield Ok(Event::default().data(error.to_string()));
            }
            Err(_) => {
                let error = json!({ "error": { "message": "run aborted", "type": "internal_error" } });
                yield Ok(Event::default().data(error.to_string()));
            }
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

// ─── Wire shapes ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatCompletionResponse {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<Choice>,
    x_session_id: String,
}

#[derive(Serialize)]
struct Choice {
    index: u32,
    message: MessagePayload,
    finish_reason: &'static str,
}

#[derive(Serialize)]
struct MessagePayload {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChunkPayload {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    x_session_id: Option<String>,
}

#[derive(Serialize)]
struct ChunkChoice {
    index: u32,
    delta: Delta,
    #[serde(skip_serializing_if = "Option::is_none")]
    finish_reason: Option<&'static str>,
}

#[derive(Serialize)]
struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_payload_omits_empty_fields() {
        let chunk = ChunkPayload {
            id: "chatcmpl-1".into(),
            object: "chat.completion.chunk",
            created: 0,
            model: "m".into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    content: Some("hi".into()),
                },
                finish_reason: None,
            }],
            x_session_id: None,
        };
        let v = serde_json::to_value(&chunk).unwrap();
        assert_eq!(v["choices"][0]["delta"]["content"], "hi");
        assert!(v.get("x_session_id").is_none());
        assert!(v["choices"][0].get("finish_reason").is_none());
    }

    #[test]
    fn final_chunk_carries_session_id_and_stop() {
        let chunk = ChunkPayload {
            id: "chatcmpl-1".into(),
            object: "chat.completion.chunk",
            created: 0,
            model: "m".into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta { content: None },
                finish_reason: Some("stop"),
            }],
            x_session_id: Some("sess-1".into()),
        };
        let v = serde_json::to_value(&chunk).unwrap();
        assert_eq!(v["x_session_id"], "sess-1");
        assert_eq!(v["choices"][0]["finish_reason"], "stop");
        assert!(v["choices"][0]["delta"].get("content").is_none());
    }

    #[test]
    fn completion_response_shape_is_openai_compatible() {
        let resp = ChatCompletionResponse {
            id: "chatcmpl-9".into(),
            object: "chat.completion",
            created: 1,
            model: "m".into(),
            choices: vec![Choice {
                index: 0,
                message: MessagePayload {
                    role: "assistant",
                    content: "4".into(),
                },
                finish_reason: "stop",
            }],
            x_session_id: "sess-2".into(),
        };
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["choices"][0]["message"]["role"], "assistant");
        assert_eq!(v["choices"][0]["message"]["content"], "4");
        assert_eq!(v["x_session_id"], "sess-2");
    }
}
