// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Edge termination for browsers and shell wrappers: WebSocket upgrade,
//! principal binding, health probe, and optional TLS.

pub mod outbound;
pub mod wire;
pub mod ws;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::fabric::Fabric;

/// Gateway tunables, filled from config.
pub struct GatewaySettings {
    pub auth_token: Option<String>,
    pub high_water_bytes: usize,
    pub low_water_bytes: usize,
    pub heartbeat: Duration,
}

/// Shared state behind the axum router.
pub struct Gateway {
    pub fabric: Arc<Fabric>,
    pub settings: GatewaySettings,
    pub shutdown: CancellationToken,
    pub connections: AtomicI64,
}

impl Gateway {
    pub fn new(fabric: Arc<Fabric>, settings: GatewaySettings, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self { fabric, settings, shutdown, connections: AtomicI64::new(0) })
    }
}

/// Assemble the public router.
pub fn build_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}

#[derive(serde::Serialize)]
struct HealthBody {
    status: &'static str,
    terminals: usize,
    connections: i64,
}

async fn healthz(State(gateway): State<Arc<Gateway>>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        terminals: gateway.fabric.host().count(),
        connections: gateway.connections.load(Ordering::Relaxed),
    })
}

/// Build a TLS acceptor from PEM cert/key files.
pub fn tls_acceptor(cert_path: &std::path::Path, key_path: &std::path::Path) -> anyhow::Result<tokio_rustls::TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(
        std::fs::File::open(cert_path).context("open tls cert")?,
    ))
    .collect::<Result<Vec<_>, _>>()
    .context("parse tls cert")?;
    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(
        std::fs::File::open(key_path).context("open tls key")?,
    ))
    .context("parse tls key")?
    .context("no private key in tls key file")?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("build tls config")?;
    Ok(tokio_rustls::TlsAcceptor::from(Arc::new(config)))
}

/// Serve the router over TLS with a manual accept loop (axum's `serve` is
/// plain TCP only; each handshaken stream is handed to hyper directly).
pub async fn serve_tls(
    listener: TcpListener,
    acceptor: tokio_rustls::TlsAcceptor,
    router: Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!("TLS listening on {}", listener.local_addr()?);
    let mut make_svc = router.into_make_service();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accept = listener.accept() => {
                let (stream, peer) = match accept {
                    Ok(pair) => pair,
                    Err(e) => {
                        debug!("tcp accept error: {e}");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let svc_future = <_ as tower::Service<_>>::call(&mut make_svc, ());
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(s) => s,
                        Err(e) => {
                            debug!(%peer, "tls handshake failed: {e}");
                            return;
                        }
                    };
                    let Ok(svc) = svc_future.await;
                    let io = hyper_util::rt::TokioIo::new(tls_stream);
                    let hyper_svc = hyper_util::service::TowerToHyperService::new(svc);
                    let result = hyper_util::server::conn::auto::Builder::new(
                        hyper_util::rt::TokioExecutor::new(),
                    )
                    .serve_connection_with_upgrades(io, hyper_svc)
                    .await;
                    if let Err(e) = result {
                        debug!(%peer, "tls connection error: {e}");
                    }
                });
            }
        }
    }
}

/// Serve the router over plain TCP.
pub async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!("HTTP listening on {}", listener.local_addr()?);
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;
    if let Err(e) = result {
        error!("HTTP server error: {e}");
    }
    Ok(())
}
