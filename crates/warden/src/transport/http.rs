// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admin HTTP API: issue and revoke directives, inspect hosts and audit.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::transport::{authorized, AppState};
use crate::wire::{Scope, UnlockPolicy};

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub scope: Scope,
    pub reason: String,
    pub unlock_policy: UnlockPolicy,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "admin".to_owned()
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

fn unauthorized() -> axum::response::Response {
    (StatusCode::UNAUTHORIZED, Json(ErrorBody { error: "unauthorized" })).into_response()
}

pub async fn issue_block(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<BlockRequest>,
) -> axum::response::Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let directive = state
        .warden
        .issue_block(body.scope, body.reason, body.unlock_policy, body.source)
        .await;
    Json(serde_json::json!({ "directive": directive })).into_response()
}

pub async fn issue_unblock(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> axum::response::Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let removed = state.warden.issue_unblock(id).await;
    if removed {
        Json(serde_json::json!({ "removed": true })).into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(ErrorBody { error: "unknown directive" })).into_response()
    }
}

pub async fn list_directives(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    Json(serde_json::json!({ "directives": state.warden.active_directives().await }))
        .into_response()
}

pub async fn list_hosts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    Json(serde_json::json!({ "hosts": state.warden.hosts_info().await })).into_response()
}

pub async fn audit_log(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    Json(serde_json::json!({ "audit": state.warden.audit_log().await })).into_response()
}

pub async fn healthz(State(state): State<Arc<AppState>>) -> axum::response::Response {
    Json(serde_json::json!({
        "status": "ok",
        "hosts": state.warden.host_count().await,
        "directives": state.warden.active_directives().await.len(),
    }))
    .into_response()
}
