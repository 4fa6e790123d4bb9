// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process surface for AI agent plugins.
//!
//! An agent registers with a capability set and gets back a session bound to
//! an `agent`-role principal. Every operation is gated on the capability the
//! grant carries; the fabric applies its normal role and membership rules on
//! top. Task events are ordinary fabric events under `ai_agent:*`, routed
//! but never interpreted.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::OpError;
use crate::fabric::address::{Address, Pattern};
use crate::fabric::model::{SplitDirection, TabKind, TabShape, WorkspaceShape};
use crate::fabric::router::{RoutedEvent, SubscriptionHandle};
use crate::fabric::{Fabric, PaneContext};
use crate::principal::{Principal, Role};
use crate::terminal::{OutputSink, SubscriptionMode, TerminalEvent};

/// What an agent session is allowed to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    pub observe_output: bool,
    pub write_input: bool,
    pub manage_panes: bool,
    pub spawn_terminals: bool,
    pub publish_tasks: bool,
}

impl CapabilitySet {
    pub fn full() -> Self {
        Self {
            observe_output: true,
            write_input: true,
            manage_panes: true,
            spawn_terminals: true,
            publish_tasks: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    pub name: String,
    pub capabilities: CapabilitySet,
}

/// Registration point handed to agent plugins at startup.
pub struct AgentBridge {
    fabric: Arc<Fabric>,
}

impl AgentBridge {
    pub fn new(fabric: Arc<Fabric>) -> Arc<Self> {
        Arc::new(Self { fabric })
    }

    /// Mint an agent principal and bind a session to it.
    pub fn register(&self, descriptor: AgentDescriptor) -> AgentSession {
        let principal_id = format!("agent-{}", uuid::Uuid::new_v4());
        AgentSession {
            fabric: Arc::clone(&self.fabric),
            principal: Principal::new(principal_id.clone(), descriptor.name, Role::Agent),
            capabilities: descriptor.capabilities,
            connection_id: format!("conn-{principal_id}"),
        }
    }
}

/// A registered agent: a first-class principal with a capability grant.
pub struct AgentSession {
    fabric: Arc<Fabric>,
    pub principal: Principal,
    capabilities: CapabilitySet,
    connection_id: String,
}

/// Sink that forwards terminal events onto an in-process channel.
struct ChannelSink {
    tx: mpsc::UnboundedSender<(String, TerminalEvent)>,
}

impl OutputSink for ChannelSink {
    fn deliver(&self, subscription_id: &str, event: TerminalEvent) {
        let _ = self.tx.send((subscription_id.to_owned(), event));
    }
}

impl AgentSession {
    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    fn require(&self, allowed: bool, what: &str) -> Result<(), OpError> {
        if allowed {
            Ok(())
        } else {
            Err(OpError::unauthorized(format!("agent grant lacks {what}")))
        }
    }

    /// Observe fabric events matching a selector pattern.
    pub fn subscribe(
        &self,
        selector: &str,
    ) -> Result<(SubscriptionHandle, mpsc::UnboundedReceiver<RoutedEvent>), OpError> {
        let pattern = Pattern::parse(selector)
            .ok_or_else(|| OpError::bad_request(format!("invalid selector: {selector}")))?;
        Ok(self.fabric.router.subscribe(vec![pattern]))
    }

    /// Publish a task event. Only `ai_agent:*` kinds may be emitted; the
    /// fabric routes them without interpretation.
    pub fn emit(
        &self,
        address: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), OpError> {
        self.require(self.capabilities.publish_tasks, "publish_tasks")?;
        if !event.starts_with("ai_agent:") {
            return Err(OpError::bad_request("agent events must use the ai_agent:* kind"));
        }
        if Address::parse(address).is_none() {
            return Err(OpError::bad_request(format!("invalid address: {address}")));
        }
        self.fabric.router.publish(RoutedEvent {
            address: address.to_owned(),
            event: event.to_owned(),
            payload,
        });
        Ok(())
    }

    pub async fn workspace_open(&self) -> Result<WorkspaceShape, OpError> {
        self.require(self.capabilities.manage_panes, "manage_panes")?;
        self.fabric.workspace_open(&self.principal, &self.connection_id).await
    }

    pub async fn workspace_resume(&self, workspace_id: &str) -> Result<WorkspaceShape, OpError> {
        self.fabric.workspace_resume(workspace_id, &self.principal, &self.connection_id).await
    }

    pub async fn tab_create(
        &self,
        workspace_id: &str,
        kind: TabKind,
        title: Option<&str>,
    ) -> Result<TabShape, OpError> {
        self.require(self.capabilities.manage_panes, "manage_panes")?;
        if kind == TabKind::Terminal {
            self.require(self.capabilities.spawn_terminals, "spawn_terminals")?;
        }
        self.fabric
            .tab_create(workspace_id, kind, title, None, None, None, &self.principal)
            .await
    }

    pub async fn pane_split(
        &self,
        pane_id: &str,
        direction: SplitDirection,
    ) -> Result<TabShape, OpError> {
        self.require(self.capabilities.manage_panes, "manage_panes")?;
        self.fabric.pane_split(pane_id, direction, &self.principal).await
    }

    pub async fn pane_close(&self, pane_id: &str) -> Result<(), OpError> {
        self.require(self.capabilities.manage_panes, "manage_panes")?;
        self.fabric.pane_close(pane_id, &self.principal).await
    }

    pub async fn terminal_create(&self, pane_id: &str) -> Result<PaneContext, OpError> {
        self.require(self.capabilities.spawn_terminals, "spawn_terminals")?;
        self.fabric.terminal_create(pane_id, None, None, None, &self.principal).await
    }

    /// Inject input into a terminal the agent can reach.
    pub async fn terminal_input(&self, pane_id: &str, data: Bytes) -> Result<(), OpError> {
        self.require(self.capabilities.write_input, "write_input")?;
        self.fabric.terminal_input(pane_id, data, &self.principal).await
    }

    /// Stream a terminal's output (catch-up snapshot first).
    pub async fn observe(
        &self,
        pane_id: &str,
    ) -> Result<(String, mpsc::UnboundedReceiver<(String, TerminalEvent)>), OpError> {
        self.require(self.capabilities.observe_output, "observe_output")?;
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn OutputSink> = Arc::new(ChannelSink { tx });
        let subscription_id = format!("sub-{}", uuid::Uuid::new_v4());
        self.fabric
            .attach_pane(
                pane_id,
                &subscription_id,
                &self.connection_id,
                SubscriptionMode::Read,
                sink,
                &self.principal,
            )
            .await?;
        Ok((subscription_id, rx))
    }

    /// Stop observing a terminal.
    pub fn stop_observing(&self, subscription_id: &str) {
        self.fabric.host().detach(subscription_id);
    }

    /// Release everything the session holds (subscriptions, workspace refs).
    pub async fn shutdown(&self) {
        self.fabric.connection_closed(&self.connection_id).await;
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
