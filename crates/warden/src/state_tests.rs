// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use tokio::sync::mpsc::error::TryRecvError;

fn link() -> (mpsc::UnboundedSender<BusMessage>, mpsc::UnboundedReceiver<BusMessage>) {
    mpsc::unbounded_channel()
}

#[tokio::test]
async fn directive_ids_are_monotonic() {
    let state = WardenState::new();
    let a = state.issue_block(Scope::All, "one".into(), UnlockPolicy::CtrlD, "op".into()).await;
    let b = state.issue_block(Scope::All, "two".into(), UnlockPolicy::CtrlD, "op".into()).await;
    let c = state.issue_block(Scope::All, "three".into(), UnlockPolicy::CtrlD, "op".into()).await;
    assert!(a.id < b.id && b.id < c.id);
}

#[tokio::test]
async fn issued_directives_reach_every_host() {
    let state = WardenState::new();
    let (tx_a, mut rx_a) = link();
    let (tx_b, mut rx_b) = link();
    state.register_host("host-a", vec![], tx_a).await;
    state.register_host("host-b", vec![], tx_b).await;

    let directive =
        state.issue_block(Scope::All, "drill".into(), UnlockPolicy::CtrlD, "op".into()).await;

    for rx in [&mut rx_a, &mut rx_b] {
        let msg = rx.try_recv();
        match msg {
            Ok(BusMessage { payload: BusPayload::Directive { action }, .. }) => {
                assert_eq!(action, DirectiveAction::Block { directive: directive.clone() });
            }
            other => assert!(false, "expected directive broadcast, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn unblock_removes_and_broadcasts() {
    let state = WardenState::new();
    let (tx, mut rx) = link();
    state.register_host("host-a", vec![], tx).await;

    let directive =
        state.issue_block(Scope::All, "drill".into(), UnlockPolicy::CtrlD, "op".into()).await;
    let _ = rx.try_recv();

    assert!(state.issue_unblock(directive.id).await);
    assert!(!state.issue_unblock(directive.id).await, "second unblock is a no-op");
    assert!(state.active_directives().await.is_empty());

    match rx.try_recv() {
        Ok(BusMessage { payload: BusPayload::Directive { action }, .. }) => {
            assert_eq!(action, DirectiveAction::Unblock { directive_id: directive.id });
        }
        other => assert!(false, "expected unblock broadcast, got {other:?}"),
    }
    assert_eq!(rx.try_recv().err(), Some(TryRecvError::Empty));
}

#[tokio::test]
async fn sync_response_reports_current_and_revoked() {
    let state = WardenState::new();
    let kept =
        state.issue_block(Scope::All, "keep".into(), UnlockPolicy::SupervisorOnly, "op".into()).await;
    let dropped =
        state.issue_block(Scope::All, "drop".into(), UnlockPolicy::CtrlD, "op".into()).await;
    state.issue_unblock(dropped.id).await;

    let msg = state.sync_response_for(&[kept.id, dropped.id]).await;
    match msg.payload {
        BusPayload::SyncResponse { directives, revoked } => {
            assert_eq!(directives.iter().map(|d| d.id).collect::<Vec<_>>(), vec![kept.id]);
            assert_eq!(revoked, vec![dropped.id]);
        }
        other => assert!(false, "expected sync_response, got {other:?}"),
    }
}

#[tokio::test]
async fn acks_and_unblock_requests_land_in_audit() {
    let state = WardenState::new();
    let (tx, _rx) = link();
    state.register_host("host-a", vec!["term-1".into()], tx).await;
    state.record_ack("host-a", 4).await;
    state.record_unblock_request("host-a", 4, "term-1").await;

    let kinds: Vec<String> = state.audit_log().await.iter().map(|e| e.kind.clone()).collect();
    assert_eq!(kinds, vec!["host_registered", "ack", "local_unblock"]);

    let hosts = state.hosts_info().await;
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].last_ack, 4);
    assert_eq!(hosts[0].terminals, vec!["term-1"]);
}

#[tokio::test]
async fn reregistration_replaces_the_link() {
    let state = WardenState::new();
    let (tx1, mut rx1) = link();
    let (tx2, mut rx2) = link();
    state.register_host("host-a", vec![], tx1).await;
    state.register_host("host-a", vec![], tx2).await;
    assert_eq!(state.host_count().await, 1);

    state.issue_block(Scope::All, "drill".into(), UnlockPolicy::CtrlD, "op".into()).await;
    assert!(rx2.try_recv().is_ok(), "new link must receive broadcasts");
    assert!(rx1.try_recv().is_err(), "old link must be detached");
}
