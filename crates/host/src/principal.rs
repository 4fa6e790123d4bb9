// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// Verified identity bound to a connection.
///
/// Token validation happens at the gateway boundary; by the time a
/// `Principal` exists, the identity is trusted. A principal may hold any
/// number of simultaneous connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub principal_id: String,
    pub display_name: String,
    pub role: Role,
}

impl Principal {
    pub fn new(principal_id: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self { principal_id: principal_id.into(), display_name: display_name.into(), role }
    }
}

/// What a principal is allowed to do with the session graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Collaborator,
    Observer,
    Supervisor,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Collaborator => "collaborator",
            Self::Observer => "observer",
            Self::Supervisor => "supervisor",
            Self::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Self::Owner),
            "collaborator" => Some(Self::Collaborator),
            "observer" => Some(Self::Observer),
            "supervisor" => Some(Self::Supervisor),
            "agent" => Some(Self::Agent),
            _ => None,
        }
    }

    /// Tab/pane create, split, close and terminal create.
    ///
    /// Agents pass this gate too; their finer-grained capability set is
    /// enforced by the bridge before the operation reaches the fabric.
    pub fn can_restructure(&self) -> bool {
        !matches!(self, Self::Observer)
    }

    /// Terminal input and resize.
    pub fn can_write_terminal(&self) -> bool {
        !matches!(self, Self::Observer)
    }

    /// Supervisors bypass block directives and membership checks.
    pub fn is_supervisor(&self) -> bool {
        matches!(self, Self::Supervisor)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "principal_tests.rs"]
mod tests;
