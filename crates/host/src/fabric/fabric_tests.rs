// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use std::time::Duration;

use crate::principal::Role;
use crate::supervisory::{Scope, UnlockPolicy};
use crate::terminal::HostSettings;

fn principal(id: &str, role: Role) -> Principal {
    Principal::new(id, id, role)
}

fn build_fabric() -> Arc<Fabric> {
    let host = TerminalHost::new(HostSettings {
        max_terminals: 8,
        ring_bytes: 64 * 1024,
        grace: Duration::from_secs(30),
    });
    let directives = Arc::new(DirectiveSet::new());
    let correlations = Arc::new(Correlations::new(Duration::from_secs(15)));
    Fabric::new(
        host,
        directives,
        correlations,
        ShapeStore::new(None),
        FabricSettings {
            default_shell: "/bin/cat".to_owned(),
            default_cols: 80,
            default_rows: 24,
        },
    )
}

fn block_all(id: u64) -> Directive {
    Directive {
        id,
        scope: Scope::All,
        reason: "drill".to_owned(),
        source: "sup-1".to_owned(),
        issued_at_ms: 0,
        unlock: UnlockPolicy::CtrlD,
    }
}

#[tokio::test]
async fn observer_cannot_open_workspace() {
    let fabric = build_fabric();
    let err = fabric.workspace_open(&principal("p1", Role::Observer), "conn-1").await;
    assert_eq!(err.err().map(|e| e.code), Some(crate::error::ErrorCode::Unauthorized));
}

#[tokio::test]
async fn open_then_resume_joins_other_principal() -> anyhow::Result<()> {
    let fabric = build_fabric();
    let owner = principal("p1", Role::Owner);
    let collab = principal("p2", Role::Collaborator);

    let shape = fabric.workspace_open(&owner, "conn-1").await?;

    // Non-member collaborator is rejected until they resume.
    let err = fabric
        .tab_create(&shape.workspace_id, TabKind::AiAgent, None, None, None, None, &collab)
        .await;
    assert_eq!(err.err().map(|e| e.code), Some(crate::error::ErrorCode::Unauthorized));

    let resumed = fabric.workspace_resume(&shape.workspace_id, &collab, "conn-2").await?;
    assert_eq!(resumed.workspace_id, shape.workspace_id);

    let tab = fabric
        .tab_create(&shape.workspace_id, TabKind::AiAgent, Some("agent"), None, None, None, &collab)
        .await?;
    assert_eq!(tab.kind, TabKind::AiAgent);
    assert!(tab.panes.is_empty());
    Ok(())
}

#[tokio::test]
async fn resume_unknown_workspace_is_not_found() {
    let fabric = build_fabric();
    let err = fabric
        .workspace_resume("ws-missing", &principal("p1", Role::Owner), "conn-1")
        .await;
    assert_eq!(err.err().map(|e| e.code), Some(crate::error::ErrorCode::NotFound));
}

#[tokio::test]
async fn terminal_tab_comes_up_with_running_terminal() -> anyhow::Result<()> {
    let fabric = build_fabric();
    let owner = principal("p1", Role::Owner);
    let ws = fabric.workspace_open(&owner, "conn-1").await?;

    let tab = fabric
        .tab_create(&ws.workspace_id, TabKind::Terminal, None, None, None, None, &owner)
        .await?;

    assert_eq!(tab.panes.len(), 1);
    let pane = &tab.panes[0];
    assert!(pane.active);
    assert_eq!(pane.rect, model::Rect::FULL);
    let terminal_id = pane.terminal_id.clone();
    assert!(terminal_id.is_some(), "initial pane must carry a terminal");

    let live = terminal_id.and_then(|id| fabric.host().get(&id));
    assert!(live.is_some(), "terminal must be registered with the host");
    Ok(())
}

#[tokio::test]
async fn split_binds_no_terminal_until_requested() -> anyhow::Result<()> {
    let fabric = build_fabric();
    let owner = principal("p1", Role::Owner);
    let ws = fabric.workspace_open(&owner, "conn-1").await?;
    let tab = fabric
        .tab_create(&ws.workspace_id, TabKind::Terminal, None, None, None, None, &owner)
        .await?;
    let p1 = tab.panes[0].pane_id.clone();

    let updated = fabric.pane_split(&p1, SplitDirection::Horizontal, &owner).await?;
    assert_eq!(updated.panes.len(), 2);
    let new_pane = updated
        .panes
        .iter()
        .find(|p| p.pane_id != p1)
        .map(|p| (p.pane_id.clone(), p.terminal_id.clone(), p.rect));
    let Some((new_id, new_terminal, rect)) = new_pane else {
        anyhow::bail!("split produced no new pane");
    };
    assert_eq!(new_terminal, None);
    assert_eq!(rect, model::Rect { x: 50, y: 0, w: 50, h: 100 });

    let context = fabric.terminal_create(&new_id, None, None, None, &owner).await?;
    assert!(context.terminal_id.is_some());

    // Second create on the same pane is invalid.
    let err = fabric.terminal_create(&new_id, None, None, None, &owner).await;
    assert_eq!(err.err().map(|e| e.code), Some(crate::error::ErrorCode::InvalidState));
    Ok(())
}

#[tokio::test]
async fn closing_last_pane_closes_tab_and_workspace_destroys_when_unreferenced(
) -> anyhow::Result<()> {
    let fabric = build_fabric();
    let owner = principal("p1", Role::Owner);
    let ws = fabric.workspace_open(&owner, "conn-1").await?;
    let tab = fabric
        .tab_create(&ws.workspace_id, TabKind::Terminal, None, None, None, None, &owner)
        .await?;
    let p1 = tab.panes[0].pane_id.clone();

    fabric.pane_close(&p1, &owner).await?;
    // Tab is gone, workspace is still referenced by conn-1.
    assert!(fabric.pane_context(&p1).await.is_none());
    assert!(fabric.workspace_ids().await.contains(&ws.workspace_id));

    fabric.connection_closed("conn-1").await;
    assert!(!fabric.workspace_ids().await.contains(&ws.workspace_id));
    Ok(())
}

#[tokio::test]
async fn block_all_rejects_input_and_ctrl_d_unblocks_one_terminal() -> anyhow::Result<()> {
    let fabric = build_fabric();
    let owner = principal("p1", Role::Owner);
    let ws = fabric.workspace_open(&owner, "conn-1").await?;
    let tab1 = fabric
        .tab_create(&ws.workspace_id, TabKind::Terminal, None, None, None, None, &owner)
        .await?;
    let tab2 = fabric
        .tab_create(&ws.workspace_id, TabKind::Terminal, None, None, None, None, &owner)
        .await?;
    let p1 = tab1.panes[0].pane_id.clone();
    let p2 = tab2.panes[0].pane_id.clone();

    fabric.apply_block(block_all(1)).await;

    let err = fabric.terminal_input(&p1, Bytes::from_static(b"ls\n"), &owner).await;
    assert_eq!(err.err().map(|e| e.code), Some(crate::error::ErrorCode::Blocked));
    let err = fabric.terminal_input(&p2, Bytes::from_static(b"ls\n"), &owner).await;
    assert_eq!(err.err().map(|e| e.code), Some(crate::error::ErrorCode::Blocked));

    // Owner's Ctrl+D releases only the targeted terminal.
    fabric.terminal_input(&p1, Bytes::from_static(b"\x04"), &owner).await?;
    fabric.terminal_input(&p1, Bytes::from_static(b"ls\n"), &owner).await?;

    let err = fabric.terminal_input(&p2, Bytes::from_static(b"ls\n"), &owner).await;
    assert_eq!(err.err().map(|e| e.code), Some(crate::error::ErrorCode::Blocked));
    Ok(())
}

#[tokio::test]
async fn supervisor_writes_through_blocks() -> anyhow::Result<()> {
    let fabric = build_fabric();
    let owner = principal("p1", Role::Owner);
    let supervisor = principal("sup", Role::Supervisor);
    let ws = fabric.workspace_open(&owner, "conn-1").await?;
    let tab = fabric
        .tab_create(&ws.workspace_id, TabKind::Terminal, None, None, None, None, &owner)
        .await?;
    let p1 = tab.panes[0].pane_id.clone();

    fabric.apply_block(block_all(1)).await;
    fabric.terminal_input(&p1, Bytes::from_static(b"whoami\n"), &supervisor).await?;
    Ok(())
}

#[tokio::test]
async fn terminals_created_under_active_directive_start_blocked() -> anyhow::Result<()> {
    let fabric = build_fabric();
    let owner = principal("p1", Role::Owner);
    let ws = fabric.workspace_open(&owner, "conn-1").await?;

    fabric.apply_block(block_all(1)).await;

    let tab = fabric
        .tab_create(&ws.workspace_id, TabKind::Terminal, None, None, None, None, &owner)
        .await?;
    let p1 = tab.panes[0].pane_id.clone();

    let err = fabric.terminal_input(&p1, Bytes::from_static(b"ls\n"), &owner).await;
    assert_eq!(err.err().map(|e| e.code), Some(crate::error::ErrorCode::Blocked));

    fabric.apply_unblock(1);
    fabric.terminal_input(&p1, Bytes::from_static(b"ls\n"), &owner).await?;
    Ok(())
}

#[tokio::test]
async fn structural_events_flow_to_workspace_subscribers() -> anyhow::Result<()> {
    let fabric = build_fabric();
    let owner = principal("p1", Role::Owner);
    let ws = fabric.workspace_open(&owner, "conn-1").await?;

    let pattern = address::Pattern::parse(&format!("workspace:{}", ws.workspace_id));
    let Some(pattern) = pattern else {
        anyhow::bail!("pattern parse failed");
    };
    let (_handle, mut rx) = fabric.router.subscribe(vec![pattern]);

    let tab = fabric
        .tab_create(&ws.workspace_id, TabKind::Terminal, None, None, None, None, &owner)
        .await?;

    let event = rx.try_recv()?;
    assert_eq!(event.event, "tab:created");
    assert_eq!(event.address, format!("workspace:{}:tab:{}", ws.workspace_id, tab.tab_id));
    Ok(())
}

#[tokio::test]
async fn workspace_scoped_directive_spares_other_workspaces() -> anyhow::Result<()> {
    let fabric = build_fabric();
    let owner = principal("p1", Role::Owner);
    let ws_a = fabric.workspace_open(&owner, "conn-1").await?;
    let ws_b = fabric.workspace_open(&owner, "conn-1").await?;
    let tab_a = fabric
        .tab_create(&ws_a.workspace_id, TabKind::Terminal, None, None, None, None, &owner)
        .await?;
    let tab_b = fabric
        .tab_create(&ws_b.workspace_id, TabKind::Terminal, None, None, None, None, &owner)
        .await?;
    let pane_a = tab_a.panes[0].pane_id.clone();
    let pane_b = tab_b.panes[0].pane_id.clone();

    fabric
        .apply_block(Directive {
            id: 1,
            scope: Scope::Workspace { workspace_id: ws_a.workspace_id.clone() },
            reason: "audit".to_owned(),
            source: "sup-1".to_owned(),
            issued_at_ms: 0,
            unlock: UnlockPolicy::SupervisorOnly,
        })
        .await;

    let err = fabric.terminal_input(&pane_a, Bytes::from_static(b"ls\n"), &owner).await;
    assert_eq!(err.err().map(|e| e.code), Some(crate::error::ErrorCode::Blocked));
    fabric.terminal_input(&pane_b, Bytes::from_static(b"ls\n"), &owner).await?;
    Ok(())
}
