// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hierarchical event addresses.
//!
//! The wire form is a colon-joined path:
//! `workspace:{W}`, `workspace:{W}:tab:{T}`,
//! `workspace:{W}:tab:{T}:pane:{P}`, and
//! `workspace:{W}:tab:{T}:pane:{P}:terminal:{op}`.
//! Parsing yields a typed address; rendering reproduces the exact string,
//! so the wire form is stable regardless of how events are produced.

/// A parsed hierarchical address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Workspace { workspace: String },
    Tab { workspace: String, tab: String },
    Pane { workspace: String, tab: String, pane: String },
    Terminal { workspace: String, tab: String, pane: String, op: String },
}

impl Address {
    pub fn workspace(workspace: impl Into<String>) -> Self {
        Self::Workspace { workspace: workspace.into() }
    }

    pub fn tab(workspace: impl Into<String>, tab: impl Into<String>) -> Self {
        Self::Tab { workspace: workspace.into(), tab: tab.into() }
    }

    pub fn pane(
        workspace: impl Into<String>,
        tab: impl Into<String>,
        pane: impl Into<String>,
    ) -> Self {
        Self::Pane { workspace: workspace.into(), tab: tab.into(), pane: pane.into() }
    }

    pub fn terminal_op(
        workspace: impl Into<String>,
        tab: impl Into<String>,
        pane: impl Into<String>,
        op: impl Into<String>,
    ) -> Self {
        Self::Terminal {
            workspace: workspace.into(),
            tab: tab.into(),
            pane: pane.into(),
            op: op.into(),
        }
    }

    /// Parse the wire form. Ids must be non-empty and may not contain `:`.
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        match parts.as_slice() {
            ["workspace", w] => Some(Self::Workspace { workspace: (*w).to_owned() }),
            ["workspace", w, "tab", t] => {
                Some(Self::Tab { workspace: (*w).to_owned(), tab: (*t).to_owned() })
            }
            ["workspace", w, "tab", t, "pane", p] => Some(Self::Pane {
                workspace: (*w).to_owned(),
                tab: (*t).to_owned(),
                pane: (*p).to_owned(),
            }),
            ["workspace", w, "tab", t, "pane", p, "terminal", op] => Some(Self::Terminal {
                workspace: (*w).to_owned(),
                tab: (*t).to_owned(),
                pane: (*p).to_owned(),
                op: (*op).to_owned(),
            }),
            _ => None,
        }
    }

    /// Render the stable wire form.
    pub fn render(&self) -> String {
        match self {
            Self::Workspace { workspace } => format!("workspace:{workspace}"),
            Self::Tab { workspace, tab } => format!("workspace:{workspace}:tab:{tab}"),
            Self::Pane { workspace, tab, pane } => {
                format!("workspace:{workspace}:tab:{tab}:pane:{pane}")
            }
            Self::Terminal { workspace, tab, pane, op } => {
                format!("workspace:{workspace}:tab:{tab}:pane:{pane}:terminal:{op}")
            }
        }
    }

    pub fn workspace_id(&self) -> &str {
        match self {
            Self::Workspace { workspace }
            | Self::Tab { workspace, .. }
            | Self::Pane { workspace, .. }
            | Self::Terminal { workspace, .. } => workspace,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// A subscription pattern over addresses.
///
/// Segment-wise match: a literal segment must match exactly, `*` matches any
/// single segment, and a pattern with fewer segments than the address matches
/// the whole subtree under its prefix. `workspace:ws-1` therefore matches
/// every event inside that workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
}

impl Pattern {
    /// Parse a pattern string. Empty segments are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() {
            return None;
        }
        let mut segments = Vec::new();
        for part in s.split(':') {
            match part {
                "" => return None,
                "*" => segments.push(Segment::Any),
                lit => segments.push(Segment::Literal(lit.to_owned())),
            }
        }
        Some(Self { segments })
    }

    /// Whether this pattern matches the rendered address.
    pub fn matches(&self, address: &str) -> bool {
        let parts: Vec<&str> = address.split(':').collect();
        if self.segments.len() > parts.len() {
            return false;
        }
        self.segments.iter().zip(parts.iter()).all(|(seg, part)| match seg {
            Segment::Any => true,
            Segment::Literal(lit) => lit == part,
        })
    }
}

#[cfg(test)]
#[path = "address_tests.rs"]
mod tests;
