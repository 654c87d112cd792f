// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Readiness probe: reports whether the inference backend answers.
pub async fn api_health(State(state): State<AppState>) -> Json<Value> {
    let backend_available = state.backend.is_available().await;
    Json(json!({
        "status": "ok",
        "backend_available": backend_available,
        "stop_requested": state.stop.is_requested(),
    }))
}
