// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Warden wiring: state, router, server, signals.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::state::WardenState;
use crate::transport::{build_router, AppState};

pub struct RunningWarden {
    pub state: Arc<AppState>,
    pub local_addr: SocketAddr,
    pub shutdown: CancellationToken,
}

pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

pub async fn prepare(config: Config) -> anyhow::Result<RunningWarden> {
    init_tracing(&config);
    let shutdown = CancellationToken::new();

    let state = Arc::new(AppState {
        warden: Arc::new(WardenState::new()),
        auth_token: config.auth_token.clone(),
        shutdown: shutdown.clone(),
    });

    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind((config.bind_host.as_str(), config.bind_port)).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "weftwarden listening");

    let sd = shutdown.clone();
    tokio::spawn(async move {
        let result =
            axum::serve(listener, router).with_graceful_shutdown(sd.cancelled_owned()).await;
        if let Err(e) = result {
            error!("server error: {e}");
        }
    });

    Ok(RunningWarden { state, local_addr, shutdown })
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let running = prepare(config).await?;
    spawn_signal_handler(running.shutdown.clone());
    running.shutdown.cancelled().await;
    info!("weftwarden stopped");
    Ok(())
}

/// First signal cancels gracefully; a second forces exit.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => info!("received SIGTERM"),
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => info!("received SIGINT"),
        }
        shutdown.cancel();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => info!("received SIGTERM again, forcing exit"),
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => info!("received SIGINT again, forcing exit"),
        }
        std::process::exit(130);
    });
}
