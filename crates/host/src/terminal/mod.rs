// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal ownership: live PTYs, their output fan-out, input queues, block
//! enforcement, and the grace-window retention that lets clients reconnect
//! to a recently closed terminal's output.

pub mod pty;

pub use pty::{ExitStatus, ShellSpec};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::OpError;
use crate::principal::Role;
use crate::ring::OutputRing;
use crate::supervisory::UnlockPolicy;
use pty::Pty;

/// Capacity of each per-terminal input queue (writes, not bytes).
const INPUT_QUEUE_DEPTH: usize = 256;

/// PTY read buffer size.
const READ_CHUNK: usize = 8192;

/// How long after SIGHUP before the shell is force-killed.
const KILL_GRACE: Duration = Duration::from_secs(3);

/// Byte that clears a `ctrl_d`-policy block when sent by the owner.
const UNBLOCK_BYTE: u8 = 0x04;

/// Events delivered to a terminal subscription, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    /// Catch-up from the output ring, sent once immediately after attach.
    Snapshot { offset: u64, data: Bytes },
    /// Live output bytes. `offset` is the global position of the first byte.
    Data { offset: u64, data: Bytes },
    Blocked { directive_id: u64, reason: String },
    Unblocked { directive_id: u64 },
    Closed { exit: Option<ExitStatus> },
}

/// Where subscription events go. Implementations must not block; the
/// gateway backs this with its bounded outbound queue, the agent bridge
/// with an in-process channel.
pub trait OutputSink: Send + Sync {
    fn deliver(&self, subscription_id: &str, event: TerminalEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionMode {
    Read,
    ReadWrite,
}

/// Who is writing to a terminal.
#[derive(Debug, Clone)]
pub struct WriteSource {
    pub principal_id: String,
    pub role: Role,
}

/// Result of a write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted,
    Blocked,
    UnknownTerminal,
}

/// Lifecycle state reported for a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Running,
    Blocked,
    Closing,
    Closed,
}

/// A block overlay installed on one terminal by a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockState {
    pub directive_id: u64,
    pub reason: String,
    pub source: String,
    pub unlock: UnlockPolicy,
}

/// A local Ctrl+D unblock, reported on the supervisory bus for audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnblockReport {
    pub directive_id: u64,
    pub terminal_id: String,
}

/// Host-level notifications consumed by the fabric.
#[derive(Debug, Clone)]
pub enum HostNotice {
    TerminalClosed { terminal_id: String, exit: Option<ExitStatus> },
}

struct SubEntry {
    connection_id: String,
    mode: SubscriptionMode,
    sink: Arc<dyn OutputSink>,
}

struct InputFrame {
    data: Bytes,
    supervisor: bool,
}

enum Phase {
    Running,
    Closing,
    Closed,
}

/// One live terminal: a PTY, its output ring, and its subscribers.
pub struct Terminal {
    pub id: String,
    pub owner_principal_id: String,
    pub created_at_ms: u64,
    pty: Arc<Pty>,
    input_tx: mpsc::Sender<InputFrame>,
    ring: Mutex<OutputRing>,
    subs: Mutex<IndexMap<String, SubEntry>>,
    block: Mutex<Option<BlockState>>,
    phase: Mutex<Phase>,
}

impl Terminal {
    pub fn size(&self) -> (u16, u16) {
        self.pty.size()
    }

    pub fn child_pid(&self) -> u32 {
        self.pty.child_pid()
    }

    pub fn block_state(&self) -> Option<BlockState> {
        self.block.lock().clone()
    }

    pub fn state(&self) -> TerminalState {
        match *self.phase.lock() {
            Phase::Running => {
                if self.block.lock().is_some() {
                    TerminalState::Blocked
                } else {
                    TerminalState::Running
                }
            }
            Phase::Closing => TerminalState::Closing,
            Phase::Closed => TerminalState::Closed,
        }
    }

    /// Append output to the ring and fan it out to every subscription.
    ///
    /// The ring lock is held across delivery: `attach` snapshots under the
    /// same lock, so a new subscriber can never see a byte both in its
    /// snapshot and again as live data.
    fn emit_output(&self, data: &[u8]) {
        let mut ring = self.ring.lock();
        ring.push(data);
        let offset = ring.total_written() - data.len() as u64;
        let data = Bytes::copy_from_slice(data);
        let subs = self.subs.lock();
        for (sub_id, entry) in subs.iter() {
            entry.sink.deliver(sub_id, TerminalEvent::Data { offset, data: data.clone() });
        }
    }

    /// Fan a control event out to every subscription.
    fn emit_control(&self, event: &TerminalEvent) {
        let subs = self.subs.lock();
        for (sub_id, entry) in subs.iter() {
            entry.sink.deliver(sub_id, event.clone());
        }
    }

    /// Whether an input frame may reach the PTY right now.
    fn input_allowed(&self, supervisor: bool) -> bool {
        supervisor || self.block.lock().is_none()
    }
}

/// Output retained after close so reconnecting clients can still catch up.
struct RetainedOutput {
    start_offset: u64,
    data: Vec<u8>,
    exit: Option<ExitStatus>,
    deadline: Instant,
}

/// Host tunables, filled from config.
#[derive(Debug, Clone)]
pub struct HostSettings {
    pub max_terminals: usize,
    pub ring_bytes: usize,
    pub grace: Duration,
}

/// Owns every live PTY on this host.
pub struct TerminalHost {
    settings: HostSettings,
    terminals: RwLock<HashMap<String, Arc<Terminal>>>,
    /// subscription_id -> terminal_id, for detach by subscription.
    subs_index: Mutex<HashMap<String, String>>,
    retained: Mutex<HashMap<String, RetainedOutput>>,
    notices_tx: broadcast::Sender<HostNotice>,
    unblock_tx: Mutex<Option<mpsc::UnboundedSender<UnblockReport>>>,
}

impl TerminalHost {
    pub fn new(settings: HostSettings) -> Arc<Self> {
        let (notices_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            settings,
            terminals: RwLock::new(HashMap::new()),
            subs_index: Mutex::new(HashMap::new()),
            retained: Mutex::new(HashMap::new()),
            notices_tx,
            unblock_tx: Mutex::new(None),
        })
    }

    /// Subscribe to terminal lifecycle notices (fabric wiring).
    pub fn subscribe_notices(&self) -> broadcast::Receiver<HostNotice> {
        self.notices_tx.subscribe()
    }

    /// Route local Ctrl+D unblock reports to the supervisory link.
    pub fn set_unblock_reporter(&self, tx: mpsc::UnboundedSender<UnblockReport>) {
        *self.unblock_tx.lock() = Some(tx);
    }

    pub fn terminal_ids(&self) -> Vec<String> {
        self.terminals.read().keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.terminals.read().len()
    }

    pub fn get(&self, terminal_id: &str) -> Option<Arc<Terminal>> {
        self.terminals.read().get(terminal_id).cloned()
    }

    /// Allocate a PTY, fork the shell, and start the pump.
    pub fn create(
        self: &Arc<Self>,
        owner_principal_id: &str,
        shell: &ShellSpec,
        cols: u16,
        rows: u16,
    ) -> Result<Arc<Terminal>, OpError> {
        {
            let terminals = self.terminals.read();
            if terminals.len() >= self.settings.max_terminals {
                return Err(OpError::resource_limit(format!(
                    "terminal cap reached ({})",
                    self.settings.max_terminals
                )));
            }
        }

        let pty = Pty::spawn(shell, cols, rows)
            .map_err(|e| OpError::internal(format!("shell spawn failed: {e:#}")))?;

        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_DEPTH);
        let terminal = Arc::new(Terminal {
            id: format!("term-{}", uuid::Uuid::new_v4()),
            owner_principal_id: owner_principal_id.to_owned(),
            created_at_ms: epoch_ms(),
            pty: Arc::new(pty),
            input_tx,
            ring: Mutex::new(OutputRing::new(self.settings.ring_bytes)),
            subs: Mutex::new(IndexMap::new()),
            block: Mutex::new(None),
            phase: Mutex::new(Phase::Running),
        });

        self.terminals.write().insert(terminal.id.clone(), Arc::clone(&terminal));
        info!(terminal = %terminal.id, pid = terminal.child_pid(), "terminal created");

        let host = Arc::clone(self);
        let pumped = Arc::clone(&terminal);
        tokio::spawn(async move {
            pump(host, pumped, input_rx).await;
        });

        Ok(terminal)
    }

    /// Write input bytes. Atomic per call; strict FIFO per sender.
    pub async fn write(&self, terminal_id: &str, data: Bytes, source: &WriteSource) -> WriteOutcome {
        let Some(terminal) = self.get(terminal_id) else {
            return WriteOutcome::UnknownTerminal;
        };

        enum Verdict {
            Forward,
            Unblocked(u64),
            Rejected,
        }

        let verdict = {
            let mut block = terminal.block.lock();
            match &*block {
                None => Verdict::Forward,
                Some(_) if source.role.is_supervisor() => Verdict::Forward,
                Some(b)
                    if matches!(b.unlock, UnlockPolicy::CtrlD)
                        && data.contains(&UNBLOCK_BYTE)
                        && source.principal_id == terminal.owner_principal_id =>
                {
                    let id = b.directive_id;
                    *block = None;
                    Verdict::Unblocked(id)
                }
                Some(_) => Verdict::Rejected,
            }
        };

        match verdict {
            Verdict::Forward => {
                let frame = InputFrame { data, supervisor: source.role.is_supervisor() };
                if terminal.input_tx.send(frame).await.is_err() {
                    return WriteOutcome::UnknownTerminal;
                }
                WriteOutcome::Accepted
            }
            Verdict::Unblocked(directive_id) => {
                // The 0x04 is consumed by the unblock; forwarding it would
                // hand the shell an EOF.
                info!(terminal = %terminal.id, directive_id, "block cleared by owner ctrl+d");
                terminal.emit_control(&TerminalEvent::Unblocked { directive_id });
                if let Some(tx) = self.unblock_tx.lock().as_ref() {
                    let _ = tx.send(UnblockReport {
                        directive_id,
                        terminal_id: terminal.id.clone(),
                    });
                }
                WriteOutcome::Accepted
            }
            Verdict::Rejected => WriteOutcome::Blocked,
        }
    }

    /// Update the PTY window size. Matching dimensions skip the ioctl.
    pub fn resize(&self, terminal_id: &str, cols: u16, rows: u16) -> Result<(), OpError> {
        let terminal = self
            .get(terminal_id)
            .ok_or_else(|| OpError::not_found(format!("terminal {terminal_id}")))?;
        match terminal.pty.resize(cols, rows) {
            Ok(changed) => {
                if changed {
                    debug!(terminal = %terminal.id, cols, rows, "terminal resized");
                }
                Ok(())
            }
            Err(e) => Err(OpError::internal(format!("resize failed: {e:#}"))),
        }
    }

    /// Begin closing: SIGHUP now, SIGKILL if the shell lingers past the
    /// grace period. The pump finishes the teardown when the PTY drains.
    pub fn close(&self, terminal_id: &str, reason: &str) -> Result<(), OpError> {
        let terminal = self
            .get(terminal_id)
            .ok_or_else(|| OpError::not_found(format!("terminal {terminal_id}")))?;

        {
            let mut phase = terminal.phase.lock();
            if matches!(*phase, Phase::Closing | Phase::Closed) {
                return Ok(());
            }
            *phase = Phase::Closing;
        }
        info!(terminal = %terminal.id, reason, "closing terminal");
        terminal.pty.signal_hangup();

        let pty = Arc::clone(&terminal.pty);
        let held = Arc::clone(&terminal);
        tokio::spawn(async move {
            tokio::time::sleep(KILL_GRACE).await;
            if !matches!(*held.phase.lock(), Phase::Closed) {
                pty.signal_kill();
            }
        });
        Ok(())
    }

    /// Bind a connection to a terminal's output. The catch-up snapshot is
    /// delivered before any live byte so the subscriber sees a contiguous
    /// stream. The caller supplies `subscription_id` so it can route events
    /// for it before the snapshot lands.
    pub fn attach(
        &self,
        terminal_id: &str,
        subscription_id: &str,
        connection_id: &str,
        mode: SubscriptionMode,
        sink: Arc<dyn OutputSink>,
    ) -> Result<(), OpError> {
        let sub_id = subscription_id.to_owned();

        if let Some(terminal) = self.get(terminal_id) {
            // Hold the ring lock across snapshot + registration so no live
            // byte can slip between the two.
            let ring = terminal.ring.lock();
            let (offset, data) = ring.snapshot();
            sink.deliver(&sub_id, TerminalEvent::Snapshot { offset, data: Bytes::from(data) });
            terminal.subs.lock().insert(
                sub_id.clone(),
                SubEntry { connection_id: connection_id.to_owned(), mode, sink },
            );
            drop(ring);
            self.subs_index.lock().insert(sub_id, terminal_id.to_owned());
            return Ok(());
        }

        // Recently closed: serve the retained snapshot and the closed event.
        let retained = self.retained.lock();
        if let Some(kept) = retained.get(terminal_id) {
            sink.deliver(
                &sub_id,
                TerminalEvent::Snapshot {
                    offset: kept.start_offset,
                    data: Bytes::from(kept.data.clone()),
                },
            );
            sink.deliver(&sub_id, TerminalEvent::Closed { exit: kept.exit });
            return Ok(());
        }

        Err(OpError::not_found(format!("terminal {terminal_id}")))
    }

    pub fn detach(&self, subscription_id: &str) {
        let terminal_id = self.subs_index.lock().remove(subscription_id);
        if let Some(terminal_id) = terminal_id {
            if let Some(terminal) = self.get(&terminal_id) {
                terminal.subs.lock().shift_remove(subscription_id);
            }
        }
    }

    /// Drop every subscription belonging to a connection (disconnect).
    pub fn detach_connection(&self, connection_id: &str) {
        let terminals: Vec<Arc<Terminal>> = self.terminals.read().values().cloned().collect();
        let mut index = self.subs_index.lock();
        for terminal in terminals {
            let mut subs = terminal.subs.lock();
            subs.retain(|sub_id, entry| {
                let keep = entry.connection_id != connection_id;
                if !keep {
                    index.remove(sub_id);
                }
                keep
            });
        }
    }

    /// Install a block overlay on one terminal.
    pub fn set_block(&self, terminal_id: &str, block: BlockState) -> Result<(), OpError> {
        let terminal = self
            .get(terminal_id)
            .ok_or_else(|| OpError::not_found(format!("terminal {terminal_id}")))?;

        let directive_id = block.directive_id;
        let reason = block.reason.clone();
        let unlock = block.unlock;
        *terminal.block.lock() = Some(block);
        info!(terminal = %terminal.id, directive_id, "terminal blocked");
        terminal.emit_control(&TerminalEvent::Blocked { directive_id, reason });

        if let UnlockPolicy::Timeout { ms } = unlock {
            let held = Arc::clone(&terminal);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                let cleared = {
                    let mut slot = held.block.lock();
                    match &*slot {
                        Some(b) if b.directive_id == directive_id => {
                            *slot = None;
                            true
                        }
                        _ => false,
                    }
                };
                if cleared {
                    info!(terminal = %held.id, directive_id, "block expired");
                    held.emit_control(&TerminalEvent::Unblocked { directive_id });
                }
            });
        }
        Ok(())
    }

    /// Clear a block overlay if it was installed by the given directive.
    /// Returns `true` when something was cleared.
    pub fn clear_block(&self, terminal_id: &str, directive_id: u64) -> bool {
        let Some(terminal) = self.get(terminal_id) else {
            return false;
        };
        let cleared = {
            let mut slot = terminal.block.lock();
            match &*slot {
                Some(b) if b.directive_id == directive_id => {
                    *slot = None;
                    true
                }
                _ => false,
            }
        };
        if cleared {
            info!(terminal = %terminal.id, directive_id, "terminal unblocked");
            terminal.emit_control(&TerminalEvent::Unblocked { directive_id });
        }
        cleared
    }

    /// Close every terminal (host shutdown).
    pub fn close_all(&self, reason: &str) {
        for id in self.terminal_ids() {
            let _ = self.close(&id, reason);
        }
    }

    /// Periodically drop retained output past its grace deadline.
    pub fn spawn_retention_reaper(self: &Arc<Self>, cancel: CancellationToken) {
        let host = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(5));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tick.tick() => {}
                }
                let now = Instant::now();
                host.retained.lock().retain(|_, kept| kept.deadline > now);
            }
        });
    }

    /// Final teardown once the pump has drained: retain the ring for the
    /// grace window, drop the terminal, notify subscribers.
    ///
    /// Retention is installed and the registry entry removed before the
    /// closed event goes out, so an attach racing the teardown either joins
    /// the live subscriber set (and sees the event) or lands on the
    /// retained snapshot.
    fn finalize(&self, terminal: &Arc<Terminal>, exit: Option<ExitStatus>) {
        *terminal.phase.lock() = Phase::Closed;

        let (start_offset, data) = terminal.ring.lock().snapshot();
        self.retained.lock().insert(
            terminal.id.clone(),
            RetainedOutput {
                start_offset,
                data,
                exit,
                deadline: Instant::now() + self.settings.grace,
            },
        );
        self.terminals.write().remove(&terminal.id);

        terminal.emit_control(&TerminalEvent::Closed { exit });
        {
            let mut index = self.subs_index.lock();
            let subs = terminal.subs.lock();
            for sub_id in subs.keys() {
                index.remove(sub_id);
            }
        }
        terminal.subs.lock().clear();

        info!(terminal = %terminal.id, ?exit, "terminal closed");
        let _ = self.notices_tx.send(HostNotice::TerminalClosed {
            terminal_id: terminal.id.clone(),
            exit,
        });
    }
}

/// Per-terminal task: pump PTY output into the ring and subscriptions,
/// drain the input queue into the PTY, reap the child on exit.
async fn pump(host: Arc<TerminalHost>, terminal: Arc<Terminal>, mut input_rx: mpsc::Receiver<InputFrame>) {
    let pty = Arc::clone(&terminal.pty);
    let mut buf = vec![0u8; READ_CHUNK];
    let mut failed = false;
    let mut input_open = true;

    loop {
        tokio::select! {
            read = pty.read_output(&mut buf) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => terminal.emit_output(&buf[..n]),
                    Err(e) if pty::is_closed_pty_error(&e) => break,
                    Err(e) => {
                        warn!(terminal = %terminal.id, "pty read failed: {e}");
                        failed = true;
                        break;
                    }
                }
            }
            frame = input_rx.recv(), if input_open => {
                match frame {
                    Some(frame) => {
                        // Re-check the block here: a directive may have
                        // landed after the frame was queued.
                        if !terminal.input_allowed(frame.supervisor) {
                            continue;
                        }
                        if let Err(e) = pty.write_input(&frame.data).await {
                            warn!(terminal = %terminal.id, "pty write failed: {e}");
                            break;
                        }
                    }
                    None => input_open = false,
                }
            }
        }
    }

    if failed {
        // pty_io_error path: make sure the child is gone before reaping.
        pty.signal_hangup();
        pty.signal_kill();
    }

    let reaper = Arc::clone(&pty);
    let exit = tokio::task::spawn_blocking(move || reaper.wait_exit())
        .await
        .ok()
        .and_then(|r| r.ok());

    host.finalize(&terminal, exit);
}

pub(crate) fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
