// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use yare::parameterized;

#[parameterized(
    workspace = { "workspace:ws-1" },
    tab = { "workspace:ws-1:tab:tab-2" },
    pane = { "workspace:ws-1:tab:tab-2:pane:pane-3" },
    terminal = { "workspace:ws-1:tab:tab-2:pane:pane-3:terminal:data" },
)]
fn parse_render_round_trip(wire: &str) {
    let addr = Address::parse(wire);
    assert!(addr.is_some(), "failed to parse {wire}");
    let rendered = addr.map(|a| a.render());
    assert_eq!(rendered.as_deref(), Some(wire));
}

#[test]
fn parse_yields_typed_fields() {
    let addr = Address::parse("workspace:w:tab:t:pane:p:terminal:input");
    assert_eq!(
        addr,
        Some(Address::Terminal {
            workspace: "w".to_owned(),
            tab: "t".to_owned(),
            pane: "p".to_owned(),
            op: "input".to_owned(),
        })
    );
}

#[parameterized(
    empty = { "" },
    bare_keyword = { "workspace" },
    wrong_root = { "window:w" },
    missing_id = { "workspace::tab:t" },
    trailing_keyword = { "workspace:w:tab" },
    too_deep = { "workspace:w:tab:t:pane:p:terminal:data:extra" },
    wrong_middle = { "workspace:w:pane:p" },
)]
fn malformed_addresses_rejected(wire: &str) {
    assert_eq!(Address::parse(wire), None);
}

#[test]
fn workspace_id_at_every_level() {
    for wire in [
        "workspace:ws-9",
        "workspace:ws-9:tab:t",
        "workspace:ws-9:tab:t:pane:p",
        "workspace:ws-9:tab:t:pane:p:terminal:close",
    ] {
        let id = Address::parse(wire).map(|a| a.workspace_id().to_owned());
        assert_eq!(id.as_deref(), Some("ws-9"));
    }
}

#[test]
fn literal_pattern_matches_exactly() {
    let p = Pattern::parse("workspace:ws-1:tab:tab-2");
    let p = match p {
        Some(p) => p,
        None => {
            assert!(false, "pattern failed to parse");
            return;
        }
    };
    assert!(p.matches("workspace:ws-1:tab:tab-2"));
    assert!(!p.matches("workspace:ws-1:tab:tab-3"));
    assert!(!p.matches("workspace:ws-2:tab:tab-2"));
}

#[test]
fn prefix_pattern_matches_subtree() {
    let p = Pattern::parse("workspace:ws-1");
    assert!(p.as_ref().is_some_and(|p| p.matches("workspace:ws-1")));
    assert!(p.as_ref().is_some_and(|p| p.matches("workspace:ws-1:tab:t:pane:p:terminal:data")));
    assert!(p.as_ref().is_some_and(|p| !p.matches("workspace:ws-2:tab:t")));
}

#[test]
fn wildcard_matches_one_segment() {
    let p = Pattern::parse("workspace:*:tab:*:pane:*:terminal:data");
    assert!(p.as_ref().is_some_and(|p| p.matches("workspace:a:tab:b:pane:c:terminal:data")));
    assert!(p.as_ref().is_some_and(|p| !p.matches("workspace:a:tab:b:pane:c:terminal:gap")));
    // Pattern longer than the address never matches.
    assert!(p.as_ref().is_some_and(|p| !p.matches("workspace:a:tab:b")));
}

#[test]
fn empty_pattern_segment_rejected() {
    assert_eq!(Pattern::parse(""), None);
    assert_eq!(Pattern::parse("workspace::tab"), None);
}
