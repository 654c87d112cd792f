// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Session management: list/search, rename, history.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use hearth_store::SessionMeta;

use crate::auth;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    q: Option<String>,
}

#[derive(Deserialize)]
pub struct RenameBody {
    title: String,
}

fn session_info(meta: &SessionMeta) -> Value {
    json!({
        "session_id": meta.id,
        "title": meta.title,
        "created_at": meta.created_at.to_rfc3339(),
        "updated_at": meta.updated_at.to_rfc3339(),
        "message_count": meta.message_count,
    })
}

/// Resolve a session and enforce ownership.  Guest-owned sessions stay
/// readable by everyone, matching the optional-auth model.
async fn owned_session(
    state: &AppState,
    session_id: &str,
    username: &str,
) -> Result<SessionMeta, ApiError> {
    let meta = state
        .db
        .get_session(session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("session not found".into()))?;
    if meta.username != username && meta.username != auth::GUEST_USER {
        return Err(ApiError::AccessDenied("not your session".into()));
    }
    Ok(meta)
}

/// `GET /api/chat/sessions?q=` — list, or substring-search by title/id.
pub async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let username = auth::current_user(&headers, &state)?;
    let sessions = match query.q.as_deref().map(str::trim) {
        Some(q) if !q.is_empty() => state.db.search_sessions(&username, q).await?,
        _ => state.db.list_sessions(&username).await?,
    };
    let infos: Vec<Value> = sessions.iter().map(session_info).collect();
    Ok(Json(json!({ "sessions": infos })))
}

/// `PATCH /api/chat/sessions/{id}` — set the title.
pub async fn rename_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Result<Json<Value>, ApiError> {
    let username = auth::current_user(&headers, &state)?;
    owned_session(&state, &session_id, &username).await?;
    let title = body.title.trim();
    if title.is_empty() {
        return Err(ApiError::Validation("title must not be empty".into()));
    }
    state.db.set_title(&session_id, title).await?;
    let meta = state
        .db
        .get_session(&session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("session not found".into()))?;
    Ok(Json(session_info(&meta)))
}

/// `GET /api/chat/history/{id}` — the full message list.
pub async fn get_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let username = auth::current_user(&headers, &state)?;
    owned_session(&state, &session_id, &username).await?;
    let messages = state.history.load_messages(&session_id).await?;
    Ok(Json(json!({ "session_id": session_id, "messages": messages })))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
