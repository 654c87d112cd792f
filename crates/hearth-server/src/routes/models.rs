// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::auth;
use crate::error::ApiError;
use crate::state::AppState;

/// OpenAI-compatible model listing.  Falls back to the configured default
/// model when the backend cannot be queried.
pub async fn list_models(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    auth::current_user(&headers, &state)?;
    let ids = match state.backend.list_models().await {
        Ok(ids) if !ids.is_empty() => ids,
        _ => vec![state.config.backend.default_model.clone()],
    };
    let created = chrono::Utc::now().timestamp();
    let data: Vec<Value> = ids
        .into_iter()
        .map(|id| json!({ "id": id, "object": "model", "created": created, "owned_by": "system" }))
        .collect();
    Ok(Json(json!({ "object": "list", "data": data })))
}
