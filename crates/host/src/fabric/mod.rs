// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The authoritative workspace/tab/pane graph and the operations clients,
//! agents, and the supervisory link run against it.
//!
//! Each workspace is guarded by its own lock (single writer per workspace);
//! structural events are published while that lock is held, so any one
//! subscriber observes a workspace's structural events in a total order.

pub mod address;
pub mod model;
pub mod router;
pub mod shapes;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::OpError;
use crate::principal::Principal;
use crate::supervisory::{Directive, DirectiveSet};
use crate::terminal::{
    BlockState, HostNotice, OutputSink, ShellSpec, SubscriptionMode, TerminalHost, WriteOutcome,
    WriteSource,
};
use address::Address;
use model::{ClosedPane, SplitDirection, Tab, TabKind, TabShape, Workspace, WorkspaceShape};
use router::{Correlations, EventRouter, RoutedEvent};
use shapes::ShapeStore;

/// Fabric-level defaults applied when a request omits them.
#[derive(Debug, Clone)]
pub struct FabricSettings {
    pub default_shell: String,
    pub default_cols: u16,
    pub default_rows: u16,
}

/// Where a pane lives and what it is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneContext {
    pub workspace_id: String,
    pub tab_id: String,
    pub pane_id: String,
    pub terminal_id: Option<String>,
}

impl PaneContext {
    /// Address of a terminal-level event under this pane.
    pub fn terminal_address(&self, op: &str) -> String {
        Address::terminal_op(&self.workspace_id, &self.tab_id, &self.pane_id, op).render()
    }
}

pub struct Fabric {
    host: Arc<TerminalHost>,
    pub router: Arc<EventRouter>,
    pub correlations: Arc<Correlations>,
    directives: Arc<DirectiveSet>,
    shapes: ShapeStore,
    settings: FabricSettings,
    workspaces: RwLock<HashMap<String, Arc<RwLock<Workspace>>>>,
    /// workspace_id -> connection ids currently referencing it.
    refs: Mutex<HashMap<String, HashSet<String>>>,
}

impl Fabric {
    pub fn new(
        host: Arc<TerminalHost>,
        directives: Arc<DirectiveSet>,
        correlations: Arc<Correlations>,
        shapes: ShapeStore,
        settings: FabricSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            host,
            router: Arc::new(EventRouter::new()),
            correlations,
            directives,
            shapes,
            settings,
            workspaces: RwLock::new(HashMap::new()),
            refs: Mutex::new(HashMap::new()),
        })
    }

    pub fn host(&self) -> &Arc<TerminalHost> {
        &self.host
    }

    // -- workspace ----------------------------------------------------------

    /// Create a workspace for the principal and reference it from the
    /// connection.
    pub async fn workspace_open(
        &self,
        principal: &Principal,
        connection_id: &str,
    ) -> Result<WorkspaceShape, OpError> {
        if !principal.role.can_restructure() {
            return Err(OpError::unauthorized("observers cannot open workspaces"));
        }
        let workspace = Workspace::new(&principal.principal_id);
        let shape = workspace.shape();
        let id = workspace.id.clone();

        self.workspaces.write().await.insert(id.clone(), Arc::new(RwLock::new(workspace)));
        self.refs.lock().entry(id.clone()).or_default().insert(connection_id.to_owned());
        self.shapes.save(&shape);
        info!(workspace = %id, principal = %principal.principal_id, "workspace opened");
        Ok(shape)
    }

    /// Join a live workspace (or recover its last persisted shape) and
    /// reference it from the connection.
    pub async fn workspace_resume(
        &self,
        workspace_id: &str,
        principal: &Principal,
        connection_id: &str,
    ) -> Result<WorkspaceShape, OpError> {
        let entry = self.workspaces.read().await.get(workspace_id).cloned();
        if let Some(entry) = entry {
            let mut ws = entry.write().await;
            ws.members.insert(principal.principal_id.clone());
            self.refs
                .lock()
                .entry(workspace_id.to_owned())
                .or_default()
                .insert(connection_id.to_owned());
            return Ok(ws.shape());
        }

        // Not live: hand back the persisted shape so the client can render
        // its last layout. Terminals in it are gone.
        self.shapes
            .load(workspace_id)
            .ok_or_else(|| OpError::not_found(format!("workspace {workspace_id}")))
    }

    // -- tab ----------------------------------------------------------------

    /// Create a tab. Terminal tabs come up with their initial pane and a
    /// running terminal, so the one-pane invariant holds before the tab is
    /// externally visible.
    #[allow(clippy::too_many_arguments)]
    pub async fn tab_create(
        &self,
        workspace_id: &str,
        kind: TabKind,
        title: Option<&str>,
        shell: Option<&str>,
        cols: Option<u16>,
        rows: Option<u16>,
        principal: &Principal,
    ) -> Result<TabShape, OpError> {
        if !principal.role.can_restructure() {
            return Err(OpError::unauthorized("role cannot create tabs"));
        }
        let entry = self
            .workspaces
            .read()
            .await
            .get(workspace_id)
            .cloned()
            .ok_or_else(|| OpError::not_found(format!("workspace {workspace_id}")))?;

        let mut ws = entry.write().await;
        check_member(&ws, principal)?;

        let shape = match kind {
            TabKind::Terminal => {
                let (mut tab, pane_id) = Tab::new_terminal(title.unwrap_or("Terminal"));
                let terminal_id = self.spawn_bound_terminal(
                    &ws.id,
                    principal,
                    shell,
                    cols.unwrap_or(self.settings.default_cols),
                    rows.unwrap_or(self.settings.default_rows),
                )?;
                if let Some(pane) = tab.panes.get_mut(&pane_id) {
                    pane.terminal_id = Some(terminal_id);
                }
                let shape = tab_shape(&tab);
                ws.tabs.insert(tab.id.clone(), tab);
                shape
            }
            other => {
                let tab = Tab::new_other(other, title.unwrap_or(other.as_str()));
                let shape = tab_shape(&tab);
                ws.tabs.insert(tab.id.clone(), tab);
                shape
            }
        };

        self.shapes.save(&ws.shape());
        self.publish(
            Address::tab(&ws.id, &shape.tab_id).render(),
            "tab:created",
            serde_json::json!({ "workspace_id": ws.id, "tab": shape }),
        );
        Ok(shape)
    }

    /// Advisory focus change; validates the target exists.
    pub async fn tab_switch(
        &self,
        workspace_id: &str,
        tab_id: &str,
        principal: &Principal,
    ) -> Result<(), OpError> {
        let entry = self
            .workspaces
            .read()
            .await
            .get(workspace_id)
            .cloned()
            .ok_or_else(|| OpError::not_found(format!("workspace {workspace_id}")))?;
        let ws = entry.read().await;
        check_member(&ws, principal)?;
        if !ws.tabs.contains_key(tab_id) {
            return Err(OpError::not_found(format!("tab {tab_id}")));
        }
        Ok(())
    }

    pub async fn tab_close(&self, tab_id: &str, principal: &Principal) -> Result<(), OpError> {
        if !principal.role.can_restructure() {
            return Err(OpError::unauthorized("role cannot close tabs"));
        }
        let entry = self
            .workspace_of_tab(tab_id)
            .await
            .ok_or_else(|| OpError::not_found(format!("tab {tab_id}")))?;

        let mut ws = entry.write().await;
        check_member(&ws, principal)?;
        self.remove_tab(&mut ws, tab_id, true)?;
        self.after_structural_change(&mut ws).await;
        Ok(())
    }

    // -- pane ---------------------------------------------------------------

    pub async fn pane_split(
        &self,
        pane_id: &str,
        direction: SplitDirection,
        principal: &Principal,
    ) -> Result<TabShape, OpError> {
        if !principal.role.can_restructure() {
            return Err(OpError::unauthorized("role cannot split panes"));
        }
        let entry = self
            .workspace_of_pane(pane_id)
            .await
            .ok_or_else(|| OpError::not_found(format!("pane {pane_id}")))?;

        let mut ws = entry.write().await;
        check_member(&ws, principal)?;

        let tab_id = ws
            .find_pane(pane_id)
            .map(|(t, _)| t.id.clone())
            .ok_or_else(|| OpError::not_found(format!("pane {pane_id}")))?;
        let tab = ws
            .tabs
            .get_mut(&tab_id)
            .ok_or_else(|| OpError::not_found(format!("tab {tab_id}")))?;
        tab.split(pane_id, direction)?;
        let shape = tab_shape(tab);

        self.shapes.save(&ws.shape());
        self.publish(
            Address::pane(&ws.id, &tab_id, pane_id).render(),
            "pane:split",
            serde_json::json!({ "workspace_id": ws.id, "tab": shape }),
        );
        Ok(shape)
    }

    pub async fn pane_close(&self, pane_id: &str, principal: &Principal) -> Result<(), OpError> {
        if !principal.role.can_restructure() {
            return Err(OpError::unauthorized("role cannot close panes"));
        }
        let entry = self
            .workspace_of_pane(pane_id)
            .await
            .ok_or_else(|| OpError::not_found(format!("pane {pane_id}")))?;

        let mut ws = entry.write().await;
        check_member(&ws, principal)?;
        self.remove_pane(&mut ws, pane_id, true)?;
        self.after_structural_change(&mut ws).await;
        Ok(())
    }

    // -- terminal -----------------------------------------------------------

    /// Bind a new terminal to an empty pane.
    pub async fn terminal_create(
        &self,
        pane_id: &str,
        shell: Option<&str>,
        cols: Option<u16>,
        rows: Option<u16>,
        principal: &Principal,
    ) -> Result<PaneContext, OpError> {
        if !principal.role.can_restructure() {
            return Err(OpError::unauthorized("role cannot create terminals"));
        }
        let entry = self
            .workspace_of_pane(pane_id)
            .await
            .ok_or_else(|| OpError::not_found(format!("pane {pane_id}")))?;

        let mut ws = entry.write().await;
        check_member(&ws, principal)?;

        let (tab_id, existing) = ws
            .find_pane(pane_id)
            .map(|(t, p)| (t.id.clone(), p.terminal_id.clone()))
            .ok_or_else(|| OpError::not_found(format!("pane {pane_id}")))?;
        if existing.is_some() {
            return Err(OpError::invalid_state(format!("pane {pane_id} already has a terminal")));
        }

        let terminal_id = self.spawn_bound_terminal(
            &ws.id,
            principal,
            shell,
            cols.unwrap_or(self.settings.default_cols),
            rows.unwrap_or(self.settings.default_rows),
        )?;

        let tab = ws
            .tabs
            .get_mut(&tab_id)
            .ok_or_else(|| OpError::not_found(format!("tab {tab_id}")))?;
        if let Some(pane) = tab.panes.get_mut(pane_id) {
            pane.terminal_id = Some(terminal_id.clone());
        }

        let context = PaneContext {
            workspace_id: ws.id.clone(),
            tab_id: tab_id.clone(),
            pane_id: pane_id.to_owned(),
            terminal_id: Some(terminal_id.clone()),
        };

        self.shapes.save(&ws.shape());
        self.publish(
            context.terminal_address("created"),
            "terminal:created",
            serde_json::json!({
                "workspace_id": ws.id,
                "tab_id": tab_id,
                "pane_id": pane_id,
                "terminal_id": terminal_id,
            }),
        );
        Ok(context)
    }

    /// Write input bytes to the terminal bound to a pane.
    pub async fn terminal_input(
        &self,
        pane_id: &str,
        data: Bytes,
        principal: &Principal,
    ) -> Result<(), OpError> {
        if !principal.role.can_write_terminal() {
            return Err(OpError::unauthorized("role cannot write to terminals"));
        }
        let context = self.require_pane_member(pane_id, principal).await?;
        let terminal_id = context
            .terminal_id
            .ok_or_else(|| OpError::invalid_state(format!("pane {pane_id} has no terminal")))?;

        let source = WriteSource {
            principal_id: principal.principal_id.clone(),
            role: principal.role,
        };
        match self.host.write(&terminal_id, data, &source).await {
            WriteOutcome::Accepted => Ok(()),
            WriteOutcome::Blocked => Err(OpError::blocked("input blocked by directive")),
            WriteOutcome::UnknownTerminal => {
                Err(OpError::not_found(format!("terminal {terminal_id}")))
            }
        }
    }

    pub async fn terminal_resize(
        &self,
        pane_id: &str,
        cols: u16,
        rows: u16,
        principal: &Principal,
    ) -> Result<(), OpError> {
        if !principal.role.can_write_terminal() {
            return Err(OpError::unauthorized("role cannot resize terminals"));
        }
        if cols == 0 || rows == 0 {
            return Err(OpError::bad_request("cols and rows must be positive"));
        }
        let context = self.require_pane_member(pane_id, principal).await?;
        let terminal_id = context
            .terminal_id
            .ok_or_else(|| OpError::invalid_state(format!("pane {pane_id} has no terminal")))?;
        self.host.resize(&terminal_id, cols, rows)
    }

    pub async fn terminal_close(&self, pane_id: &str, principal: &Principal) -> Result<(), OpError> {
        if !principal.role.can_restructure() {
            return Err(OpError::unauthorized("role cannot close terminals"));
        }
        let context = self.require_pane_member(pane_id, principal).await?;
        let terminal_id = context
            .terminal_id
            .ok_or_else(|| OpError::invalid_state(format!("pane {pane_id} has no terminal")))?;
        self.host.close(&terminal_id, "client request")
    }

    /// Permission and shape checks for an attach, without performing it.
    /// Callers register routing for the subscription id first, then call
    /// [`Fabric::attach_pane`], so the catch-up snapshot is never dropped.
    pub async fn prepare_attach(
        &self,
        pane_id: &str,
        mode: SubscriptionMode,
        principal: &Principal,
    ) -> Result<PaneContext, OpError> {
        if mode == SubscriptionMode::ReadWrite && !principal.role.can_write_terminal() {
            return Err(OpError::unauthorized("role is read-only"));
        }
        let context = self.require_pane_member(pane_id, principal).await?;
        if context.terminal_id.is_none() {
            return Err(OpError::invalid_state(format!("pane {pane_id} has no terminal")));
        }
        Ok(context)
    }

    /// Bind a connection to a pane's terminal output.
    pub async fn attach_pane(
        &self,
        pane_id: &str,
        subscription_id: &str,
        connection_id: &str,
        mode: SubscriptionMode,
        sink: Arc<dyn OutputSink>,
        principal: &Principal,
    ) -> Result<PaneContext, OpError> {
        let context = self.prepare_attach(pane_id, mode, principal).await?;
        let terminal_id = context
            .terminal_id
            .clone()
            .ok_or_else(|| OpError::invalid_state(format!("pane {pane_id} has no terminal")))?;
        self.host.attach(&terminal_id, subscription_id, connection_id, mode, sink)?;
        Ok(context)
    }

    // -- lookups ------------------------------------------------------------

    /// Locate a pane anywhere in the fabric.
    pub async fn pane_context(&self, pane_id: &str) -> Option<PaneContext> {
        let entries: Vec<Arc<RwLock<Workspace>>> =
            self.workspaces.read().await.values().cloned().collect();
        for entry in entries {
            let ws = entry.read().await;
            if let Some((tab, pane)) = ws.find_pane(pane_id) {
                return Some(PaneContext {
                    workspace_id: ws.id.clone(),
                    tab_id: tab.id.clone(),
                    pane_id: pane.id.clone(),
                    terminal_id: pane.terminal_id.clone(),
                });
            }
        }
        None
    }

    /// Locate the pane bound to a terminal.
    pub async fn terminal_context(&self, terminal_id: &str) -> Option<PaneContext> {
        let entries: Vec<Arc<RwLock<Workspace>>> =
            self.workspaces.read().await.values().cloned().collect();
        for entry in entries {
            let ws = entry.read().await;
            if let Some((tab, pane)) = ws.find_terminal(terminal_id) {
                return Some(PaneContext {
                    workspace_id: ws.id.clone(),
                    tab_id: tab.id.clone(),
                    pane_id: pane.id.clone(),
                    terminal_id: pane.terminal_id.clone(),
                });
            }
        }
        None
    }

    pub async fn workspace_ids(&self) -> Vec<String> {
        self.workspaces.read().await.keys().cloned().collect()
    }

    // -- connection lifecycle ----------------------------------------------

    /// A connection went away: drop its workspace references and destroy
    /// empty unreferenced workspaces.
    pub async fn connection_closed(&self, connection_id: &str) {
        self.correlations.drop_connection(connection_id);
        self.host.detach_connection(connection_id);

        let affected: Vec<String> = {
            let mut refs = self.refs.lock();
            let mut affected = Vec::new();
            for (ws_id, conns) in refs.iter_mut() {
                if conns.remove(connection_id) {
                    affected.push(ws_id.clone());
                }
            }
            affected
        };

        for ws_id in affected {
            let entry = self.workspaces.read().await.get(&ws_id).cloned();
            if let Some(entry) = entry {
                let mut ws = entry.write().await;
                self.after_structural_change(&mut ws).await;
            }
        }
    }

    // -- supervisory directives ---------------------------------------------

    /// Install a block directive across its scope.
    pub async fn apply_block(&self, directive: Directive) {
        self.directives.insert(directive.clone());
        let targets = self.resolve_scope(&directive).await;
        info!(directive = directive.id, targets = targets.len(), "applying block directive");
        for terminal_id in targets {
            let block = BlockState {
                directive_id: directive.id,
                reason: directive.reason.clone(),
                source: directive.source.clone(),
                unlock: directive.unlock,
            };
            if let Err(e) = self.host.set_block(&terminal_id, block) {
                debug!(terminal = %terminal_id, "block skipped: {e}");
            }
        }
    }

    /// Clear a directive everywhere it was applied.
    pub fn apply_unblock(&self, directive_id: u64) {
        let removed = self.directives.remove(directive_id);
        if removed.is_none() {
            debug!(directive_id, "unblock for unknown directive");
        }
        for terminal_id in self.host.terminal_ids() {
            self.host.clear_block(&terminal_id, directive_id);
        }
    }

    /// The supervisor link has been down past the fail-open window: clear
    /// every `ctrl_d`-policy directive locally.
    pub fn fail_open(&self) {
        let opened = self.directives.fail_open();
        if opened.is_empty() {
            return;
        }
        warn!(count = opened.len(), "supervisor unreachable, failing open ctrl_d directives");
        for directive in opened {
            for terminal_id in self.host.terminal_ids() {
                self.host.clear_block(&terminal_id, directive.id);
            }
        }
    }

    async fn resolve_scope(&self, directive: &Directive) -> Vec<String> {
        match &directive.scope {
            crate::supervisory::Scope::All => self.host.terminal_ids(),
            crate::supervisory::Scope::Terminal { terminal_id } => vec![terminal_id.clone()],
            crate::supervisory::Scope::Workspace { workspace_id } => {
                let entry = self.workspaces.read().await.get(workspace_id).cloned();
                match entry {
                    Some(entry) => entry.read().await.terminal_ids(),
                    None => Vec::new(),
                }
            }
        }
    }

    // -- host notices -------------------------------------------------------

    /// Consume terminal lifecycle notices: when a shell exits, close its
    /// pane (and cascade the tab close when it was the last one).
    pub fn spawn_notice_task(self: &Arc<Self>, cancel: CancellationToken) {
        let fabric = Arc::clone(self);
        let mut notices = self.host.subscribe_notices();
        tokio::spawn(async move {
            loop {
                let notice = tokio::select! {
                    _ = cancel.cancelled() => return,
                    notice = notices.recv() => notice,
                };
                match notice {
                    Ok(HostNotice::TerminalClosed { terminal_id, .. }) => {
                        fabric.handle_terminal_closed(&terminal_id).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("host notice subscriber lagged by {n}");
                    }
                    Err(_) => return,
                }
            }
        });
    }

    async fn handle_terminal_closed(&self, terminal_id: &str) {
        let Some(context) = self.terminal_context(terminal_id).await else {
            return;
        };
        let entry = self.workspaces.read().await.get(&context.workspace_id).cloned();
        let Some(entry) = entry else {
            return;
        };
        let mut ws = entry.write().await;
        // close_terminal=false: the PTY is already gone.
        if let Err(e) = self.remove_pane(&mut ws, &context.pane_id, false) {
            debug!(pane = %context.pane_id, "pane cleanup after terminal exit: {e}");
        }
        self.after_structural_change(&mut ws).await;
    }

    // -- internals ----------------------------------------------------------

    fn spawn_bound_terminal(
        &self,
        workspace_id: &str,
        principal: &Principal,
        shell: Option<&str>,
        cols: u16,
        rows: u16,
    ) -> Result<String, OpError> {
        let spec = parse_shell(shell.unwrap_or(&self.settings.default_shell))?;
        let terminal = self.host.create(&principal.principal_id, &spec, cols, rows)?;

        // Directives issued before this terminal existed still bind it.
        for directive in self.directives.matching(Some(workspace_id), &terminal.id) {
            let block = BlockState {
                directive_id: directive.id,
                reason: directive.reason.clone(),
                source: directive.source.clone(),
                unlock: directive.unlock,
            };
            let _ = self.host.set_block(&terminal.id, block);
        }
        Ok(terminal.id.clone())
    }

    /// Remove one pane from its tab: close its terminal (unless the host
    /// already did), publish `pane:closed`, cascade to `tab:closed` when it
    /// was the last pane.
    fn remove_pane(
        &self,
        ws: &mut Workspace,
        pane_id: &str,
        close_terminal: bool,
    ) -> Result<(), OpError> {
        let tab_id = ws
            .find_pane(pane_id)
            .map(|(t, _)| t.id.clone())
            .ok_or_else(|| OpError::not_found(format!("pane {pane_id}")))?;
        let tab = ws
            .tabs
            .get_mut(&tab_id)
            .ok_or_else(|| OpError::not_found(format!("tab {tab_id}")))?;

        let ClosedPane { terminal_id, last } = tab.close_pane(pane_id)?;
        if close_terminal {
            if let Some(ref terminal_id) = terminal_id {
                let _ = self.host.close(terminal_id, "pane closed");
            }
        }

        self.publish(
            Address::pane(&ws.id, &tab_id, pane_id).render(),
            "pane:closed",
            serde_json::json!({ "workspace_id": ws.id, "tab_id": tab_id, "pane_id": pane_id }),
        );

        if last {
            self.remove_tab(ws, &tab_id, close_terminal)?;
        } else if let Some(tab) = ws.tabs.get(&tab_id) {
            let shape = tab_shape(tab);
            self.publish(
                Address::tab(&ws.id, &tab_id).render(),
                "tab:updated",
                serde_json::json!({ "workspace_id": ws.id, "tab": shape }),
            );
        }
        Ok(())
    }

    /// Remove a tab, closing any terminals still bound to its panes.
    fn remove_tab(
        &self,
        ws: &mut Workspace,
        tab_id: &str,
        close_terminals: bool,
    ) -> Result<(), OpError> {
        let tab = ws
            .tabs
            .shift_remove(tab_id)
            .ok_or_else(|| OpError::not_found(format!("tab {tab_id}")))?;

        if close_terminals {
            for pane in tab.panes.values() {
                if let Some(ref terminal_id) = pane.terminal_id {
                    let _ = self.host.close(terminal_id, "tab closed");
                }
            }
        }
        self.publish(
            Address::tab(&ws.id, tab_id).render(),
            "tab:closed",
            serde_json::json!({ "workspace_id": ws.id, "tab_id": tab_id }),
        );
        Ok(())
    }

    /// Persist the new shape, or destroy the workspace when nothing holds it
    /// anymore (no tabs and no connection references).
    async fn after_structural_change(&self, ws: &mut Workspace) {
        let unreferenced =
            self.refs.lock().get(&ws.id).map(|c| c.is_empty()).unwrap_or(true);
        if ws.tabs.is_empty() && unreferenced {
            self.workspaces.write().await.remove(&ws.id);
            self.refs.lock().remove(&ws.id);
            self.shapes.purge(&ws.id);
            self.publish(
                Address::workspace(&ws.id).render(),
                "workspace:destroyed",
                serde_json::json!({ "workspace_id": ws.id }),
            );
            info!(workspace = %ws.id, "workspace destroyed");
        } else {
            self.shapes.save(&ws.shape());
        }
    }

    async fn require_pane_member(
        &self,
        pane_id: &str,
        principal: &Principal,
    ) -> Result<PaneContext, OpError> {
        let context = self
            .pane_context(pane_id)
            .await
            .ok_or_else(|| OpError::not_found(format!("pane {pane_id}")))?;
        let entry = self.workspaces.read().await.get(&context.workspace_id).cloned();
        let entry =
            entry.ok_or_else(|| OpError::not_found(format!("workspace {}", context.workspace_id)))?;
        let ws = entry.read().await;
        check_member(&ws, principal)?;
        Ok(context)
    }

    async fn workspace_of_pane(&self, pane_id: &str) -> Option<Arc<RwLock<Workspace>>> {
        let entries: Vec<Arc<RwLock<Workspace>>> =
            self.workspaces.read().await.values().cloned().collect();
        for entry in entries {
            if entry.read().await.find_pane(pane_id).is_some() {
                return Some(entry);
            }
        }
        None
    }

    async fn workspace_of_tab(&self, tab_id: &str) -> Option<Arc<RwLock<Workspace>>> {
        let entries: Vec<Arc<RwLock<Workspace>>> =
            self.workspaces.read().await.values().cloned().collect();
        for entry in entries {
            if entry.read().await.tabs.contains_key(tab_id) {
                return Some(entry);
            }
        }
        None
    }

    fn publish(&self, address: String, event: &str, payload: serde_json::Value) {
        self.router.publish(RoutedEvent { address, event: event.to_owned(), payload });
    }
}

fn check_member(ws: &Workspace, principal: &Principal) -> Result<(), OpError> {
    if principal.role.is_supervisor() || ws.is_member(&principal.principal_id) {
        Ok(())
    } else {
        Err(OpError::unauthorized(format!(
            "principal {} has not joined workspace {}",
            principal.principal_id, ws.id
        )))
    }
}

fn tab_shape(tab: &Tab) -> TabShape {
    TabShape {
        tab_id: tab.id.clone(),
        kind: tab.kind,
        title: tab.title.clone(),
        active_pane_id: tab.active_pane_id().map(ToOwned::to_owned),
        panes: tab
            .panes
            .values()
            .map(|p| model::PaneShape {
                pane_id: p.id.clone(),
                terminal_id: p.terminal_id.clone(),
                rect: p.rect,
                active: p.active,
            })
            .collect(),
    }
}

/// Split a shell command line into a spec. Whitespace splitting is enough
/// here; quoting belongs to the shell the spec launches.
fn parse_shell(command: &str) -> Result<ShellSpec, OpError> {
    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| OpError::bad_request("shell command is empty"))?;
    let mut spec = ShellSpec::new(program);
    spec.args = parts.map(ToOwned::to_owned).collect();
    Ok(spec)
}

#[cfg(test)]
#[path = "fabric_tests.rs"]
mod tests;
