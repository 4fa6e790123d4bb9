// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host side of the supervisory bus: a long-lived WebSocket to the central
//! authority with automatic reconnect, directive resync, acknowledgement,
//! and local-unblock reporting.
//!
//! Fail model: while the link is down, `supervisor_only` directives are
//! retained (fail closed); `ctrl_d` directives are cleared once the outage
//! exceeds the configured fail-open window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fabric::Fabric;
use crate::supervisory::wire::{BusMessage, BusPayload, DirectiveAction};
use crate::supervisory::DirectiveSet;
use crate::terminal::UnblockReport;

/// Initial reconnect delay; doubles up to the configured maximum.
const BACKOFF_START: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub url: String,
    pub host_id: String,
    pub backoff_max: Duration,
    pub fail_open_after: Duration,
}

/// Run the supervisory link until cancelled.
pub async fn run_link(
    settings: LinkSettings,
    fabric: Arc<Fabric>,
    directives: Arc<DirectiveSet>,
    mut unblock_rx: mpsc::UnboundedReceiver<UnblockReport>,
    cancel: CancellationToken,
) {
    let mut backoff = BACKOFF_START;
    let mut down_since: Option<Instant> = None;
    let mut failed_open = false;
    let mut msg_seq: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match tokio_tungstenite::connect_async(&settings.url).await {
            Ok((stream, _)) => {
                info!(url = %settings.url, "supervisor link connected");
                backoff = BACKOFF_START;
                down_since = None;
                failed_open = false;

                let (mut write, mut read) = stream.split();

                // Register, then ask the authority for its current set while
                // telling it what we already applied.
                let register = BusMessage {
                    msg_id: next_seq(&mut msg_seq),
                    payload: BusPayload::Register {
                        host_id: settings.host_id.clone(),
                        terminals: fabric.host().terminal_ids(),
                    },
                };
                let sync = BusMessage {
                    msg_id: next_seq(&mut msg_seq),
                    payload: BusPayload::SyncRequest {
                        host_id: settings.host_id.clone(),
                        applied: directives.applied_ids(),
                    },
                };
                if send_msg(&mut write, &register).await.is_err()
                    || send_msg(&mut write, &sync).await.is_err()
                {
                    warn!("supervisor link write failed during registration");
                } else {
                    run_session(
                        &settings,
                        &fabric,
                        &directives,
                        &mut unblock_rx,
                        &cancel,
                        &mut msg_seq,
                        &mut write,
                        &mut read,
                    )
                    .await;
                }
            }
            Err(e) => {
                debug!(url = %settings.url, backoff_ms = backoff.as_millis() as u64,
                    "supervisor connect failed: {e}");
            }
        }

        if cancel.is_cancelled() {
            return;
        }

        // Outage accounting for the fail-open window.
        let since = *down_since.get_or_insert_with(Instant::now);
        if !failed_open && since.elapsed() >= settings.fail_open_after {
            fabric.fail_open();
            failed_open = true;
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(settings.backoff_max);
    }
}

type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsRead = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

#[allow(clippy::too_many_arguments)]
async fn run_session(
    settings: &LinkSettings,
    fabric: &Arc<Fabric>,
    directives: &Arc<DirectiveSet>,
    unblock_rx: &mut mpsc::UnboundedReceiver<UnblockReport>,
    cancel: &CancellationToken,
    msg_seq: &mut u64,
    write: &mut WsWrite,
    read: &mut WsRead,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,

            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("supervisor link closed");
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("supervisor link error: {e}");
                        return;
                    }
                };
                let parsed: BusMessage = match serde_json::from_str(&msg) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("unparseable supervisor message: {e}");
                        continue;
                    }
                };
                if handle_message(settings, fabric, directives, msg_seq, write, parsed)
                    .await
                    .is_err()
                {
                    return;
                }
            }

            report = unblock_rx.recv() => {
                let Some(report) = report else { return };
                let msg = BusMessage {
                    msg_id: next_seq(msg_seq),
                    payload: BusPayload::UnblockRequest {
                        directive_id: report.directive_id,
                        terminal_id: report.terminal_id,
                        host_id: settings.host_id.clone(),
                    },
                };
                if send_msg(write, &msg).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn handle_message(
    settings: &LinkSettings,
    fabric: &Arc<Fabric>,
    directives: &Arc<DirectiveSet>,
    msg_seq: &mut u64,
    write: &mut WsWrite,
    msg: BusMessage,
) -> Result<(), ()> {
    match msg.payload {
        BusPayload::Directive { action } => {
            if !directives.observe_msg(msg.msg_id) {
                debug!(msg_id = msg.msg_id, "ignoring duplicate directive message");
                return Ok(());
            }
            let acked_id = match action {
                DirectiveAction::Block { directive } => {
                    let id = directive.id;
                    fabric.apply_block(directive).await;
                    id
                }
                DirectiveAction::Unblock { directive_id } => {
                    fabric.apply_unblock(directive_id);
                    directive_id
                }
            };
            let ack = BusMessage {
                msg_id: next_seq(msg_seq),
                payload: BusPayload::Ack {
                    directive_id: acked_id,
                    host_id: settings.host_id.clone(),
                },
            };
            send_msg(write, &ack).await
        }

        BusPayload::SyncResponse { directives: current, revoked } => {
            // Apply in authority id order; skip what we already hold.
            let mut sorted = current;
            sorted.sort_by_key(|d| d.id);
            let applied = directives.applied_ids();
            for directive in sorted {
                if !applied.contains(&directive.id) {
                    let id = directive.id;
                    fabric.apply_block(directive).await;
                    let ack = BusMessage {
                        msg_id: next_seq(msg_seq),
                        payload: BusPayload::Ack {
                            directive_id: id,
                            host_id: settings.host_id.clone(),
                        },
                    };
                    send_msg(write, &ack).await?;
                }
            }
            for directive_id in revoked {
                fabric.apply_unblock(directive_id);
            }
            Ok(())
        }

        // Host-originated kinds arriving here would be an authority bug.
        other => {
            debug!(?other, "unexpected supervisor message kind");
            Ok(())
        }
    }
}

async fn send_msg(write: &mut WsWrite, msg: &BusMessage) -> Result<(), ()> {
    let text = serde_json::to_string(msg).map_err(|_| ())?;
    write.send(Message::Text(text.into())).await.map_err(|_| ())
}

fn next_seq(seq: &mut u64) -> u64 {
    *seq += 1;
    *seq
}
