// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/ws/host` — the long-lived link each session host keeps to the
//! authority. The first message must be a `register`; afterwards the link
//! carries directives down and acks / unblock reports / sync requests up.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::transport::AppState;
use crate::wire::{BusMessage, BusPayload};

#[derive(Debug, Deserialize)]
pub struct HostLinkQuery {
    pub token: Option<String>,
}

pub async fn host_link_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HostLinkQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if let Some(ref required) = state.auth_token {
        if query.token.as_deref() != Some(required.as_str()) {
            return axum::http::Response::builder()
                .status(401)
                .body(axum::body::Body::from("unauthorized"))
                .unwrap_or_default()
                .into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_link(state, socket))
        .into_response()
}

async fn handle_link(state: Arc<AppState>, socket: WebSocket) {
    let (mut tx, mut rx) = socket.split();
    let warden = Arc::clone(&state.warden);

    // The handshake: a register message names the host.
    let Some((host_id, terminals)) = await_register(&mut rx).await else {
        return;
    };

    let (link_tx, mut link_rx) = mpsc::unbounded_channel::<BusMessage>();
    warden.register_host(&host_id, terminals, link_tx).await;

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,

            outgoing = link_rx.recv() => {
                let Some(msg) = outgoing else { break };
                let Ok(text) = serde_json::to_string(&msg) else { continue };
                if tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            incoming = rx.next() => {
                let msg = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(host = %host_id, "host link error: {e}");
                        break;
                    }
                };
                let parsed: BusMessage = match serde_json::from_str(&msg) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(host = %host_id, "unparseable host message: {e}");
                        continue;
                    }
                };
                match parsed.payload {
                    BusPayload::Ack { directive_id, .. } => {
                        warden.record_ack(&host_id, directive_id).await;
                    }
                    BusPayload::UnblockRequest { directive_id, ref terminal_id, .. } => {
                        warden.record_unblock_request(&host_id, directive_id, terminal_id).await;
                    }
                    BusPayload::SyncRequest { ref applied, .. } => {
                        let response = warden.sync_response_for(applied).await;
                        let Ok(text) = serde_json::to_string(&response) else { continue };
                        if tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    BusPayload::Register { terminals, .. } => {
                        // Re-register on the same socket refreshes the
                        // terminal set.
                        warden.update_terminals(&host_id, terminals).await;
                    }
                    other => {
                        debug!(host = %host_id, ?other, "unexpected host message kind");
                    }
                }
            }
        }
    }

    warden.deregister_host(&host_id).await;
}

/// Wait for the initial register message; anything else closes the link.
async fn await_register(
    rx: &mut futures_util::stream::SplitStream<WebSocket>,
) -> Option<(String, Vec<String>)> {
    while let Some(msg) = rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let parsed: BusMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("bad register message: {e}");
                        return None;
                    }
                };
                match parsed.payload {
                    BusPayload::Register { host_id, terminals } => {
                        return Some((host_id, terminals));
                    }
                    other => {
                        warn!(?other, "first message was not a register");
                        return None;
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}
