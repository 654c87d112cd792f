// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Bearer-token authentication.
//!
//! Token issuance is handled outside this server; here a request either
//! presents the configured token or it does not.  Without a configured token
//! the server runs in optional-auth mode and every request acts as `guest`.

use axum::http::HeaderMap;

use crate::error::ApiError;
use crate::state::AppState;

/// Username the token authenticates as.  The metadata DB may know richer
/// user records; this server only needs the name for scoping.
const TOKEN_USER: &str = "admin";

pub const GUEST_USER: &str = "guest";

/// Resolve the requesting user from the Authorization header.
pub fn current_user(headers: &HeaderMap, state: &AppState) -> Result<String, ApiError> {
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match (&state.config.server.auth_token, presented) {
        // Optional-auth mode: no token configured, everyone is guest.
        (None, _) => Ok(GUEST_USER.to_string()),
        (Some(expected), Some(token)) if token == expected => Ok(TOKEN_USER.to_string()),
        (Some(_), Some(_)) => Err(ApiError::Unauthorized("invalid token".into())),
        (Some(_), None) => Ok(GUEST_USER.to_string()),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
