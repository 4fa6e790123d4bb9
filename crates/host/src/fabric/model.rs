// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session entity graph: workspaces contain tabs, terminal tabs contain
//! panes arranged by a binary split tree, panes reference terminals.
//!
//! The split tree is the tiling authority: every structural change recomputes
//! pane rects from the tree, so sibling panes always cover the tab exactly
//! (no overlap, no gap) and integer percentages stay lossless.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::OpError;

/// Pane geometry in percent of the tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
}

impl Rect {
    pub const FULL: Rect = Rect { x: 0, y: 0, w: 100, h: 100 };

    pub fn area(&self) -> u32 {
        u32::from(self.w) * u32::from(self.h)
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitDirection {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabKind {
    Terminal,
    AiAgent,
    LogMonitor,
}

impl TabKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Terminal => "terminal",
            Self::AiAgent => "ai_agent",
            Self::LogMonitor => "log_monitor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "terminal" => Some(Self::Terminal),
            "ai_agent" => Some(Self::AiAgent),
            "log_monitor" => Some(Self::LogMonitor),
            _ => None,
        }
    }
}

/// Binary split tree over pane ids.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LayoutNode {
    Leaf(String),
    Split { dir: SplitDirection, first: Box<LayoutNode>, second: Box<LayoutNode> },
}

impl LayoutNode {
    /// Walk the tree, assigning each leaf its region. The splitter keeps the
    /// odd percentage point (left / top) so sums stay exact.
    fn assign(&self, region: Rect, out: &mut Vec<(String, Rect)>) {
        match self {
            Self::Leaf(id) => out.push((id.clone(), region)),
            Self::Split { dir, first, second } => {
                let (a, b) = split_region(region, *dir);
                first.assign(a, out);
                second.assign(b, out);
            }
        }
    }

    /// Replace the leaf for `pane_id` with a split of it and `new_id`.
    fn split_leaf(&mut self, pane_id: &str, new_id: &str, dir: SplitDirection) -> bool {
        match self {
            Self::Leaf(id) if id == pane_id => {
                let first = Box::new(Self::Leaf(id.clone()));
                let second = Box::new(Self::Leaf(new_id.to_owned()));
                *self = Self::Split { dir, first, second };
                true
            }
            Self::Leaf(_) => false,
            Self::Split { first, second, .. } => {
                first.split_leaf(pane_id, new_id, dir) || second.split_leaf(pane_id, new_id, dir)
            }
        }
    }

    /// Remove the leaf for `pane_id`, promoting its sibling subtree.
    /// Returns the remaining tree (None if the removed leaf was the root)
    /// and whether anything was removed.
    fn remove_leaf(self, pane_id: &str) -> (Option<LayoutNode>, bool) {
        match self {
            Self::Leaf(id) if id == pane_id => (None, true),
            leaf @ Self::Leaf(_) => (Some(leaf), false),
            Self::Split { dir, first, second } => {
                let (first, removed) = first.remove_leaf(pane_id);
                if removed {
                    return match first {
                        Some(node) => (
                            Some(Self::Split { dir, first: Box::new(node), second }),
                            true,
                        ),
                        None => (Some(*second), true),
                    };
                }
                let first = match first {
                    Some(node) => node,
                    // remove_leaf only returns None alongside removed=true
                    None => return (Some(*second), true),
                };
                let (second, removed) = second.remove_leaf(pane_id);
                match second {
                    Some(node) => (
                        Some(Self::Split {
                            dir,
                            first: Box::new(first),
                            second: Box::new(node),
                        }),
                        removed,
                    ),
                    None => (Some(first), true),
                }
            }
        }
    }

    fn leaf_ids(&self, out: &mut Vec<String>) {
        match self {
            Self::Leaf(id) => out.push(id.clone()),
            Self::Split { first, second, .. } => {
                first.leaf_ids(out);
                second.leaf_ids(out);
            }
        }
    }
}

fn split_region(region: Rect, dir: SplitDirection) -> (Rect, Rect) {
    match dir {
        SplitDirection::Horizontal => {
            let second_w = region.w / 2;
            let first_w = region.w - second_w;
            (
                Rect { w: first_w, ..region },
                Rect { x: region.x + first_w, w: second_w, ..region },
            )
        }
        SplitDirection::Vertical => {
            let second_h = region.h / 2;
            let first_h = region.h - second_h;
            (
                Rect { h: first_h, ..region },
                Rect { y: region.y + first_h, h: second_h, ..region },
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pane {
    pub id: String,
    pub terminal_id: Option<String>,
    pub rect: Rect,
    pub active: bool,
}

/// Outcome of closing a pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedPane {
    pub terminal_id: Option<String>,
    /// The tab has no panes left and must close.
    pub last: bool,
}

#[derive(Debug, Clone)]
pub struct Tab {
    pub id: String,
    pub kind: TabKind,
    pub title: String,
    pub panes: IndexMap<String, Pane>,
    layout: Option<LayoutNode>,
}

impl Tab {
    /// A terminal tab starts with one full-size active pane, so the ≥1 pane
    /// invariant holds from the moment the tab is visible.
    pub fn new_terminal(title: impl Into<String>) -> (Self, String) {
        let pane_id = new_pane_id();
        let mut panes = IndexMap::new();
        panes.insert(
            pane_id.clone(),
            Pane { id: pane_id.clone(), terminal_id: None, rect: Rect::FULL, active: true },
        );
        let tab = Self {
            id: new_tab_id(),
            kind: TabKind::Terminal,
            title: title.into(),
            panes,
            layout: Some(LayoutNode::Leaf(pane_id.clone())),
        };
        (tab, pane_id)
    }

    /// Non-terminal tabs carry no panes.
    pub fn new_other(kind: TabKind, title: impl Into<String>) -> Self {
        Self { id: new_tab_id(), kind, title: title.into(), panes: IndexMap::new(), layout: None }
    }

    pub fn active_pane_id(&self) -> Option<&str> {
        self.panes.values().find(|p| p.active).map(|p| p.id.as_str())
    }

    /// Split a pane 50/50. The new pane goes right (horizontal) or below
    /// (vertical) and becomes the active pane.
    pub fn split(&mut self, pane_id: &str, dir: SplitDirection) -> Result<String, OpError> {
        if self.kind != TabKind::Terminal {
            return Err(OpError::invalid_state(format!(
                "tab {} has kind {} and cannot be split",
                self.id,
                self.kind.as_str()
            )));
        }
        if !self.panes.contains_key(pane_id) {
            return Err(OpError::not_found(format!("pane {pane_id}")));
        }
        let Some(ref mut layout) = self.layout else {
            return Err(OpError::invalid_state(format!("tab {} has no layout", self.id)));
        };

        let new_id = new_pane_id();
        if !layout.split_leaf(pane_id, &new_id, dir) {
            return Err(OpError::not_found(format!("pane {pane_id}")));
        }
        self.panes.insert(
            new_id.clone(),
            Pane { id: new_id.clone(), terminal_id: None, rect: Rect::FULL, active: false },
        );
        self.set_active(&new_id);
        self.refresh_rects();
        Ok(new_id)
    }

    /// Remove a pane, re-tiling its siblings. The caller owns closing the
    /// terminal (if any) and cascading the tab close when `last` is set.
    pub fn close_pane(&mut self, pane_id: &str) -> Result<ClosedPane, OpError> {
        let Some(pane) = self.panes.shift_remove(pane_id) else {
            return Err(OpError::not_found(format!("pane {pane_id}")));
        };

        if let Some(layout) = self.layout.take() {
            let (rest, _) = layout.remove_leaf(pane_id);
            self.layout = rest;
        }
        self.refresh_rects();

        let last = self.panes.is_empty();
        if !last && pane.active {
            // Activate the first remaining pane in layout order.
            let next = self.pane_order().into_iter().next();
            if let Some(next) = next {
                self.set_active(&next);
            }
        }
        Ok(ClosedPane { terminal_id: pane.terminal_id, last })
    }

    /// Mark exactly one pane active.
    pub fn set_active(&mut self, pane_id: &str) {
        for pane in self.panes.values_mut() {
            pane.active = pane.id == pane_id;
        }
    }

    /// Pane ids in layout (visual) order.
    pub fn pane_order(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(ref layout) = self.layout {
            layout.leaf_ids(&mut out);
        }
        out
    }

    fn refresh_rects(&mut self) {
        let Some(ref layout) = self.layout else {
            return;
        };
        let mut assigned = Vec::new();
        layout.assign(Rect::FULL, &mut assigned);
        for (id, rect) in assigned {
            if let Some(pane) = self.panes.get_mut(&id) {
                pane.rect = rect;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Workspace {
    pub id: String,
    pub owner_principal_id: String,
    pub created_at_ms: u64,
    pub tabs: IndexMap<String, Tab>,
    /// Principals that have opened or resumed this workspace.
    pub members: HashSet<String>,
}

impl Workspace {
    pub fn new(owner_principal_id: impl Into<String>) -> Self {
        let owner = owner_principal_id.into();
        let mut members = HashSet::new();
        members.insert(owner.clone());
        Self {
            id: format!("ws-{}", uuid::Uuid::new_v4()),
            owner_principal_id: owner,
            created_at_ms: crate::terminal::epoch_ms(),
            tabs: IndexMap::new(),
            members,
        }
    }

    pub fn is_member(&self, principal_id: &str) -> bool {
        self.members.contains(principal_id)
    }

    /// Terminal ids across every pane of every tab.
    pub fn terminal_ids(&self) -> Vec<String> {
        self.tabs
            .values()
            .flat_map(|t| t.panes.values())
            .filter_map(|p| p.terminal_id.clone())
            .collect()
    }

    /// Locate the (tab, pane) holding a pane id.
    pub fn find_pane(&self, pane_id: &str) -> Option<(&Tab, &Pane)> {
        self.tabs.values().find_map(|t| t.panes.get(pane_id).map(|p| (t, p)))
    }

    /// Locate the (tab, pane) referencing a terminal id.
    pub fn find_terminal(&self, terminal_id: &str) -> Option<(&Tab, &Pane)> {
        self.tabs.values().find_map(|t| {
            t.panes.values().find(|p| p.terminal_id.as_deref() == Some(terminal_id)).map(|p| (t, p))
        })
    }

    /// Serializable snapshot of the whole workspace shape.
    pub fn shape(&self) -> WorkspaceShape {
        WorkspaceShape {
            workspace_id: self.id.clone(),
            owner_principal_id: self.owner_principal_id.clone(),
            tabs: self
                .tabs
                .values()
                .map(|t| TabShape {
                    tab_id: t.id.clone(),
                    kind: t.kind,
                    title: t.title.clone(),
                    active_pane_id: t.active_pane_id().map(ToOwned::to_owned),
                    panes: t
                        .panes
                        .values()
                        .map(|p| PaneShape {
                            pane_id: p.id.clone(),
                            terminal_id: p.terminal_id.clone(),
                            rect: p.rect,
                            active: p.active,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Wire/persisted form of a workspace's current shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceShape {
    pub workspace_id: String,
    pub owner_principal_id: String,
    pub tabs: Vec<TabShape>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabShape {
    pub tab_id: String,
    pub kind: TabKind,
    pub title: String,
    pub active_pane_id: Option<String>,
    pub panes: Vec<PaneShape>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneShape {
    pub pane_id: String,
    pub terminal_id: Option<String>,
    pub rect: Rect,
    pub active: bool,
}

fn new_tab_id() -> String {
    format!("tab-{}", uuid::Uuid::new_v4())
}

fn new_pane_id() -> String {
    format!("pane-{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
