// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket endpoint: binds a principal to the connection, translates wire
//! frames into fabric operations, and drains the bounded outbound queue
//! (terminal streams, structural events, correlated responses) to the
//! socket. Heartbeat pings every 30 s; two missed pongs terminate.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{ErrorCode, OpError};
use crate::fabric::address::Pattern;
use crate::fabric::model::TabKind;
use crate::fabric::router::{Reply, SubscriptionHandle};
use crate::fabric::PaneContext;
use crate::gateway::outbound::{OutboundQueue, Popped};
use crate::gateway::wire::{self, ClientRequest, Frame};
use crate::gateway::Gateway;
use crate::principal::{Principal, Role};
use crate::terminal::{OutputSink, SubscriptionMode, TerminalEvent};

/// Query parameters on the WebSocket upgrade. The identity arrives verified
/// from the auth layer; the gateway only consumes it.
#[derive(Debug, Clone, Deserialize)]
pub struct WsQuery {
    pub principal: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub token: Option<String>,
    /// Client kind marker (`browser` default, `wrapper` for shell wrappers).
    pub client: Option<String>,
}

pub async fn ws_handler(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if let Some(ref required) = gateway.settings.auth_token {
        if query.token.as_deref() != Some(required.as_str()) {
            return axum::http::Response::builder()
                .status(401)
                .body(axum::body::Body::from("unauthorized"))
                .unwrap_or_default()
                .into_response();
        }
    }

    let role = match query.role.as_deref() {
        None => Role::Owner,
        Some(s) => match Role::parse(s) {
            Some(role) => role,
            None => {
                return axum::http::Response::builder()
                    .status(400)
                    .body(axum::body::Body::from("unknown role"))
                    .unwrap_or_default()
                    .into_response();
            }
        },
    };

    let principal_id = query
        .principal
        .clone()
        .unwrap_or_else(|| format!("anon-{}", uuid::Uuid::new_v4()));
    let display_name = query.name.clone().unwrap_or_else(|| principal_id.clone());
    let principal = Principal::new(principal_id, display_name, role);
    let client_kind = query.client.clone().unwrap_or_else(|| "browser".to_owned());

    ws.on_upgrade(move |socket| handle_connection(gateway, principal, client_kind, socket))
        .into_response()
}

/// Per-subscription routing state: where to address stream frames.
struct Route {
    key: Arc<str>,
    context: PaneContext,
}

/// Converts host terminal events into wire frames on the connection's
/// outbound queue. Delivery is non-blocking by construction.
pub(crate) struct ConnectionSink {
    outbound: Arc<OutboundQueue<Frame>>,
    routes: Mutex<HashMap<String, Route>>,
}

impl ConnectionSink {
    fn new(outbound: Arc<OutboundQueue<Frame>>) -> Arc<Self> {
        Arc::new(Self { outbound, routes: Mutex::new(HashMap::new()) })
    }

    fn add_route(&self, subscription_id: &str, context: PaneContext) {
        self.routes.lock().insert(
            subscription_id.to_owned(),
            Route { key: Arc::from(subscription_id), context },
        );
    }

    fn remove_route(&self, subscription_id: &str) {
        self.routes.lock().remove(subscription_id);
    }

    /// Build the gap frame for a dropped-stream episode.
    fn gap_frame(&self, key: &str, missed: u64) -> Option<Frame> {
        let routes = self.routes.lock();
        let route = routes.get(key)?;
        Some(wire::terminal_gap(route.context.terminal_address("gap"), missed))
    }
}

impl OutputSink for ConnectionSink {
    fn deliver(&self, subscription_id: &str, event: TerminalEvent) {
        let routes = self.routes.lock();
        let Some(route) = routes.get(subscription_id) else {
            return;
        };
        let context = &route.context;
        match event {
            TerminalEvent::Snapshot { offset, data } | TerminalEvent::Data { offset, data } => {
                let frame = wire::terminal_data(context.terminal_address("data"), offset, &data);
                let cost = data.len();
                self.outbound.push_data(&route.key, frame, cost);
            }
            TerminalEvent::Blocked { directive_id, reason } => {
                let frame = wire::terminal_blocked(
                    context.terminal_address("blocked"),
                    directive_id,
                    &reason,
                );
                self.outbound.push_control(frame);
            }
            TerminalEvent::Unblocked { directive_id } => {
                let frame =
                    wire::terminal_unblocked(context.terminal_address("unblocked"), directive_id);
                self.outbound.push_control(frame);
            }
            TerminalEvent::Closed { exit } => {
                let frame = wire::terminal_closed(context.terminal_address("closed"), exit);
                self.outbound.push_control(frame);
            }
        }
    }
}

struct ConnCtx {
    id: String,
    principal: Principal,
    sink: Arc<ConnectionSink>,
    router: SubscriptionHandle,
}

impl ConnCtx {
    /// Start seeing every event inside a workspace.
    fn join_workspace(&self, workspace_id: &str) {
        if let Some(pattern) = Pattern::parse(&format!("workspace:{workspace_id}")) {
            self.router.add_pattern(pattern);
        }
    }
}

async fn handle_connection(
    gateway: Arc<Gateway>,
    principal: Principal,
    client_kind: String,
    socket: WebSocket,
) {
    let connection_id = format!("conn-{}", uuid::Uuid::new_v4());
    gateway.connections.fetch_add(1, Ordering::Relaxed);
    info!(
        connection = %connection_id,
        principal = %principal.principal_id,
        role = %principal.role,
        client = %client_kind,
        "connection established"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let outbound = Arc::new(OutboundQueue::new(
        gateway.settings.high_water_bytes,
        gateway.settings.low_water_bytes,
    ));
    let sink = ConnectionSink::new(Arc::clone(&outbound));
    let (router_handle, mut router_rx) = gateway.fabric.router.subscribe(vec![]);
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Reply>();

    let ctx = ConnCtx {
        id: connection_id.clone(),
        principal,
        sink: Arc::clone(&sink),
        router: router_handle.clone(),
    };

    let mut heartbeat = tokio::time::interval(gateway.settings.heartbeat);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut missed_pongs: u32 = 0;

    loop {
        tokio::select! {
            _ = gateway.shutdown.cancelled() => break,

            _ = heartbeat.tick() => {
                if missed_pongs >= 2 {
                    info!(connection = %connection_id, "terminating after missed pongs");
                    break;
                }
                missed_pongs += 1;
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }

            popped = outbound.pop() => {
                match popped {
                    Some(Popped::Item(frame)) => {
                        if send_frame(&mut ws_tx, &frame).await.is_err() {
                            break;
                        }
                    }
                    Some(Popped::Gap { key, missed }) => {
                        if let Some(frame) = sink.gap_frame(&key, missed) {
                            if send_frame(&mut ws_tx, &frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    // Closed: either shutdown or a structural-event flood.
                    None => break,
                }
            }

            reply = reply_rx.recv() => {
                let Some(reply) = reply else { break };
                outbound.push_control(Frame {
                    event: reply.event,
                    address: None,
                    request_id: Some(reply.request_id),
                    payload: reply.payload,
                });
            }

            routed = router_rx.recv() => {
                let Some(event) = routed else { break };
                let frame = wire::server_event(&event.event, event.address.clone(), event.payload);
                if event.event.starts_with("ai_agent:") {
                    // Agent chatter may coalesce under pressure; structural
                    // events never do.
                    outbound.push_coalesce(format!("{}#{}", event.address, event.event), frame);
                } else {
                    outbound.push_control(frame);
                }
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(_)) | None => break,
                };
                match msg {
                    Message::Pong(_) => missed_pongs = 0,
                    Message::Text(text) => {
                        handle_text(&gateway, &ctx, &reply_tx, &outbound, &text).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    // Teardown: detach subscriptions, release workspace refs, expire
    // correlations addressed to this connection.
    gateway.fabric.router.unsubscribe(router_handle.id);
    outbound.close();
    gateway.fabric.connection_closed(&connection_id).await;
    gateway.connections.fetch_sub(1, Ordering::Relaxed);
    info!(connection = %connection_id, "connection closed");
}

async fn handle_text(
    gateway: &Arc<Gateway>,
    ctx: &ConnCtx,
    reply_tx: &mpsc::UnboundedSender<Reply>,
    outbound: &Arc<OutboundQueue<Frame>>,
    text: &str,
) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => {
            outbound.push_control(wire::error_frame(ErrorCode::BadRequest, "invalid frame"));
            return;
        }
    };

    let response_event = frame.response_event();
    let request_id = frame.request_id.clone();

    let request = match wire::parse_request(&frame) {
        Ok(request) => request,
        Err(e) => {
            match request_id {
                Some(rid) => outbound.push_control(wire::err_response(
                    &response_event,
                    &rid,
                    e.code,
                    &e.message,
                )),
                None => outbound.push_control(wire::error_frame(e.code, &e.message)),
            };
            return;
        }
    };

    match request_id {
        Some(rid) => {
            let correlations = &gateway.fabric.correlations;
            if !correlations.register(&ctx.id, &rid, &response_event, reply_tx.clone()) {
                outbound.push_control(wire::err_response(
                    &response_event,
                    &rid,
                    ErrorCode::BadRequest,
                    "request_id already in flight",
                ));
                return;
            }
            let result = execute(gateway, ctx, request).await;
            let payload = match result {
                Ok(payload) => wire::success_payload(payload),
                Err(e) => wire::error_payload(e.code, &e.message),
            };
            correlations.fulfill(&ctx.id, &rid, &response_event, payload);
        }
        None => {
            // Fire-and-forget. Failures still produce an out-of-band notice;
            // a rejected write surfaces as `terminal:blocked` on the pane.
            let blocked_pane = match &request {
                ClientRequest::TerminalInput { pane_id, .. } => Some(pane_id.clone()),
                _ => None,
            };
            if let Err(e) = execute(gateway, ctx, request).await {
                match (e.code, blocked_pane) {
                    (ErrorCode::Blocked, Some(pane_id)) => {
                        if let Some(context) = gateway.fabric.pane_context(&pane_id).await {
                            outbound.push_control(wire::server_event(
                                "terminal:blocked",
                                context.terminal_address("blocked"),
                                serde_json::json!({ "reason": e.message }),
                            ));
                        }
                    }
                    _ => {
                        outbound.push_control(wire::error_frame(e.code, &e.message));
                    }
                }
            }
        }
    }
}

/// Run one request against the fabric, returning the response payload.
async fn execute(
    gateway: &Arc<Gateway>,
    ctx: &ConnCtx,
    request: ClientRequest,
) -> Result<serde_json::Value, OpError> {
    let fabric = &gateway.fabric;
    match request {
        ClientRequest::WorkspaceOpen => {
            let shape = fabric.workspace_open(&ctx.principal, &ctx.id).await?;
            ctx.join_workspace(&shape.workspace_id);
            Ok(serde_json::json!({
                "workspace_id": shape.workspace_id,
                "workspace": shape,
            }))
        }

        ClientRequest::WorkspaceResume { workspace_id } => {
            let shape = fabric.workspace_resume(&workspace_id, &ctx.principal, &ctx.id).await?;
            ctx.join_workspace(&workspace_id);
            // The full shape also arrives as a `workspace:state` event so
            // resuming UIs share one render path with live updates.
            ctx.sink.outbound.push_control(wire::workspace_state(&shape));
            Ok(serde_json::json!({
                "workspace_id": shape.workspace_id,
                "workspace": shape,
            }))
        }

        ClientRequest::TabCreate { workspace_id, kind, title, shell, cols, rows } => {
            let tab = fabric
                .tab_create(
                    &workspace_id,
                    kind,
                    title.as_deref(),
                    shell.as_deref(),
                    cols,
                    rows,
                    &ctx.principal,
                )
                .await?;

            // The creator is bound to the initial terminal immediately so
            // the first `terminal:data` needs no extra round trip. The tab
            // exists either way; a failed attach only loses the binding.
            let mut subscription_id = None;
            if kind == TabKind::Terminal {
                if let Some(pane) = tab.panes.first() {
                    match attach_routed(gateway, ctx, &pane.pane_id, SubscriptionMode::ReadWrite)
                        .await
                    {
                        Ok((sub, _)) => subscription_id = Some(sub),
                        Err(e) => debug!(pane = %pane.pane_id, "auto-attach failed: {e}"),
                    }
                }
            }
            Ok(serde_json::json!({
                "workspace_id": workspace_id,
                "tab": tab,
                "subscription_id": subscription_id,
            }))
        }

        ClientRequest::TabSwitch { workspace_id, tab_id } => {
            fabric.tab_switch(&workspace_id, &tab_id, &ctx.principal).await?;
            Ok(serde_json::json!({ "tab_id": tab_id }))
        }

        ClientRequest::TabClose { tab_id } => {
            fabric.tab_close(&tab_id, &ctx.principal).await?;
            Ok(serde_json::json!({ "tab_id": tab_id }))
        }

        ClientRequest::PaneSplit { pane_id, direction } => {
            let tab = fabric.pane_split(&pane_id, direction, &ctx.principal).await?;
            Ok(serde_json::json!({ "tab": tab }))
        }

        ClientRequest::PaneClose { pane_id } => {
            fabric.pane_close(&pane_id, &ctx.principal).await?;
            Ok(serde_json::json!({ "pane_id": pane_id }))
        }

        ClientRequest::TerminalCreate { pane_id, shell, cols, rows } => {
            let context = fabric
                .terminal_create(&pane_id, shell.as_deref(), cols, rows, &ctx.principal)
                .await?;
            let (subscription_id, _) =
                attach_routed(gateway, ctx, &pane_id, SubscriptionMode::ReadWrite).await?;
            Ok(serde_json::json!({
                "terminal_id": context.terminal_id,
                "pane_id": pane_id,
                "subscription_id": subscription_id,
            }))
        }

        ClientRequest::TerminalAttach { pane_id, mode } => {
            let (subscription_id, context) = attach_routed(gateway, ctx, &pane_id, mode).await?;
            Ok(serde_json::json!({
                "subscription_id": subscription_id,
                "terminal_id": context.terminal_id,
            }))
        }

        ClientRequest::TerminalInput { pane_id, data } => {
            fabric.terminal_input(&pane_id, data, &ctx.principal).await?;
            Ok(serde_json::json!({}))
        }

        ClientRequest::TerminalResize { pane_id, cols, rows } => {
            fabric.terminal_resize(&pane_id, cols, rows, &ctx.principal).await?;
            Ok(serde_json::json!({ "cols": cols, "rows": rows }))
        }

        ClientRequest::TerminalClose { pane_id } => {
            fabric.terminal_close(&pane_id, &ctx.principal).await?;
            Ok(serde_json::json!({ "pane_id": pane_id }))
        }
    }
}

/// Attach with routing registered first, so the catch-up snapshot delivered
/// during the attach is never dropped on the floor.
async fn attach_routed(
    gateway: &Arc<Gateway>,
    ctx: &ConnCtx,
    pane_id: &str,
    mode: SubscriptionMode,
) -> Result<(String, PaneContext), OpError> {
    let fabric = &gateway.fabric;
    let context = fabric.prepare_attach(pane_id, mode, &ctx.principal).await?;
    let subscription_id = format!("sub-{}", uuid::Uuid::new_v4());
    ctx.sink.add_route(&subscription_id, context.clone());

    let sink: Arc<dyn OutputSink> = Arc::clone(&ctx.sink) as Arc<dyn OutputSink>;
    match fabric
        .attach_pane(pane_id, &subscription_id, &ctx.id, mode, sink, &ctx.principal)
        .await
    {
        Ok(context) => Ok((subscription_id, context)),
        Err(e) => {
            ctx.sink.remove_route(&subscription_id);
            debug!(pane = pane_id, "attach failed: {e}");
            Err(e)
        }
    }
}

async fn send_frame(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    frame: &Frame,
) -> Result<(), ()> {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(_) => return Err(()),
    };
    ws_tx.send(Message::Text(text.into())).await.map_err(|_| ())
}
