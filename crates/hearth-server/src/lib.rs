// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod auth;
mod error;
mod routes;
mod state;
mod uploads;

pub use error::ApiError;
pub use state::AppState;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;

/// Assemble the full route table.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state);
    let body_limit = state.config.server.upload_max_bytes;

    Router::new()
        // OpenAI-compatible surface
        .route("/v1/chat/completions", post(routes::chat::chat_completions))
        .route("/v1/models", get(routes::models::list_models))
        // Background jobs
        .route(
            "/api/jobs",
            post(routes::jobs::submit_job).get(routes::jobs::list_jobs),
        )
        .route(
            "/api/jobs/:id",
            get(routes::jobs::get_job).delete(routes::jobs::cancel_job),
        )
        .route("/api/jobs/:id/stream", get(routes::jobs::stream_job))
        // Sessions
        .route("/api/chat/sessions", get(routes::sessions::list_sessions))
        .route(
            "/api/chat/sessions/:id",
            patch(routes::sessions::rename_session),
        )
        .route("/api/chat/history/:id", get(routes::sessions::get_history))
        // Admin
        .route(
            "/api/admin/stop-inference",
            get(routes::admin::stop_status)
                .post(routes::admin::request_stop)
                .delete(routes::admin::clear_stop),
        )
        .route(
            "/api/admin/reload-prompt",
            post(routes::admin::reload_prompt),
        )
        // Health
        .route("/health", get(routes::health::health))
        .route("/api/health", get(routes::health::api_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    use axum::http::{header, Method};

    let origins: Vec<HeaderValue> = state
        .config
        .server
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    if state.config.server.cors_credentials {
        // Credentialed CORS cannot use wildcards; everything is explicit.
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
    } else if !origins.is_empty() {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    } else {
        CorsLayer::new()
    }
}
