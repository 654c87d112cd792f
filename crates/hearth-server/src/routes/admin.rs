// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Admin surface: the process-wide stop flag and prompt-cache hot swap.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use crate::auth;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn stop_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    auth::current_user(&headers, &state)?;
    Ok(Json(json!({ "stop_requested": state.stop.is_requested() })))
}

/// Set the stop flag: every running agent loop aborts at its next iteration
/// boundary.
pub async fn request_stop(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    auth::current_user(&headers, &state)?;
    state.stop.request();
    info!("stop flag set via admin endpoint");
    Ok(Json(json!({
        "status": "stop signal activated",
        "stop_requested": true
    })))
}

pub async fn clear_stop(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    auth::current_user(&headers, &state)?;
    state.stop.clear();
    info!("stop flag cleared via admin endpoint");
    Ok(Json(json!({
        "status": "stop signal cleared",
        "stop_requested": false
    })))
}

/// Re-read the base system prompt from disk.
pub async fn reload_prompt(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    auth::current_user(&headers, &state)?;
    hearth_core::reload_prompt_cache().map_err(|e| ApiError::Internal(e.to_string()))?;
    info!("system prompt cache reloaded");
    Ok(Json(json!({ "status": "prompt cache reloaded" })))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::app_state;
    use axum::http::HeaderMap;

    #[tokio::test]
    async fn stop_flag_round_trip() {
        let state = app_state();
        let headers = HeaderMap::new();

        let status = stop_status(State(state.clone()), headers.clone())
            .await
            .unwrap();
        assert_eq!(status.0["stop_requested"], false);

        request_stop(State(state.clone()), headers.clone())
            .await
            .unwrap();
        assert!(state.stop.is_requested());

        clear_stop(State(state.clone()), headers.clone())
            .await
            .unwrap();
        assert!(!state.stop.is_requested());
    }
}
