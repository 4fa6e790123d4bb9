// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Best-effort persistence of `{workspace_id -> last shape}` for resume.
//!
//! One JSON file per workspace, rewritten on every structural change and
//! removed when the workspace is destroyed. Nothing else survives a host
//! restart: PTYs and output bytes are gone, only the shape comes back.

use std::path::PathBuf;

use tracing::debug;

use crate::fabric::model::WorkspaceShape;

pub struct ShapeStore {
    dir: Option<PathBuf>,
}

impl ShapeStore {
    /// `None` disables persistence (tests, ephemeral hosts).
    pub fn new(dir: Option<PathBuf>) -> Self {
        if let Some(ref dir) = dir {
            let _ = std::fs::create_dir_all(dir);
        }
        Self { dir }
    }

    fn path_for(&self, workspace_id: &str) -> Option<PathBuf> {
        // Workspace ids are host-generated (`ws-<uuid>`); refuse anything
        // that could escape the store directory.
        if workspace_id.is_empty() || !workspace_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return None;
        }
        self.dir.as_ref().map(|d| d.join(format!("{workspace_id}.json")))
    }

    /// Write the current shape. Failures are logged and swallowed; resume
    /// is best effort.
    pub fn save(&self, shape: &WorkspaceShape) {
        let Some(path) = self.path_for(&shape.workspace_id) else {
            return;
        };
        let Ok(json) = serde_json::to_vec_pretty(shape) else {
            return;
        };
        if let Err(e) = std::fs::write(&path, json) {
            debug!(workspace = %shape.workspace_id, "shape save failed: {e}");
        }
    }

    /// Load a persisted shape, if any.
    pub fn load(&self, workspace_id: &str) -> Option<WorkspaceShape> {
        let path = self.path_for(workspace_id)?;
        let bytes = std::fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Remove the persisted shape when the workspace is destroyed.
    pub fn purge(&self, workspace_id: &str) {
        if let Some(path) = self.path_for(workspace_id) {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
#[path = "shapes_tests.rs"]
mod tests;
