// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Helpers for integration tests: a config tuned for fast in-process runs
//! and a spawner that reuses the production wiring in [`crate::run`].

use crate::config::Config;
use crate::run::{prepare, RunningHost};

/// A config suitable for tests: ephemeral port, /bin/sh, short grace.
pub fn test_config() -> Config {
    Config {
        bind_host: "127.0.0.1".to_owned(),
        bind_port: 0,
        tls_cert: None,
        tls_key: None,
        require_tls: false,
        supervisor_url: None,
        auth_token: None,
        host_id: Some("host-test".to_owned()),
        shell: "/bin/sh".to_owned(),
        max_terminals_per_host: 16,
        output_ring_bytes: 64 * 1024,
        subscription_high_water_bytes: 1024 * 1024,
        subscription_low_water_bytes: 256 * 1024,
        request_timeout_ms: 5_000,
        reconnect_backoff_max_ms: 2_000,
        terminal_grace_ms: 30_000,
        fail_open_timeout_ms: 60_000,
        shapes_dir: None,
        default_cols: 80,
        default_rows: 24,
        log_format: "text".to_owned(),
        log_level: "warn".to_owned(),
    }
}

/// Spawn a full host on an ephemeral port, with config tweaks applied.
pub async fn spawn_host(mutate: impl FnOnce(&mut Config)) -> anyhow::Result<RunningHost> {
    let mut config = test_config();
    mutate(&mut config);
    config.validate()?;
    prepare(config).await
}
