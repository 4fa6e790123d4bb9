// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP admin API and the host link endpoint.

pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::WardenState;

/// Shared transport state.
pub struct AppState {
    pub warden: Arc<WardenState>,
    pub auth_token: Option<String>,
    pub shutdown: CancellationToken,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/host", get(ws::host_link_handler))
        .route("/api/v1/directives", post(http::issue_block).get(http::list_directives))
        .route("/api/v1/directives/{id}", delete(http::issue_unblock))
        .route("/api/v1/hosts", get(http::list_hosts))
        .route("/api/v1/audit", get(http::audit_log))
        .route("/healthz", get(http::healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Check the bearer token when one is configured.
pub fn authorized(state: &AppState, headers: &axum::http::HeaderMap) -> bool {
    let Some(ref required) = state.auth_token else {
        return true;
    };
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == required)
}
