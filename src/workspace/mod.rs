//! Workspaces: per-ref git worktrees inside a shared per-repository sandbox.
//!
//! This module provides the [`GitContext`]/[`Workspace`] types, the
//! idempotent setup script that converges a sandbox onto a ready worktree,
//! and the [`WorkspaceManager`] that resolves or creates the shared sandbox
//! under concurrent demand.

mod provision;
mod script;

pub use provision::WorkspaceManager;
pub use script::{clone_url, parse_worktree_path, setup_script};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::sandbox::SandboxHandle;

/// Identifies the repository (and optionally the ref) an agent run concerns.
///
/// Immutable once a run starts; steps re-derive everything else from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitContext {
    pub owner: String,
    pub repo: String,
    /// Explicit ref to check out; when absent the remote's default branch is
    /// detected during setup.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_name: Option<String>,
}

impl GitContext {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            ref_name: None,
        }
    }

    /// Sets an explicit ref to check out.
    pub fn with_ref(mut self, ref_name: impl Into<String>) -> Self {
        self.ref_name = Some(ref_name.into());
        self
    }

    /// `owner/repo` form used in prompts and log fields.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// A ready-to-use working directory inside a live sandbox.
///
/// Ephemeral: re-derived on every orchestration step. Only the sandbox id is
/// ever persisted; a later step resolves it back into a fresh `Workspace`.
#[derive(Clone)]
pub struct Workspace {
    /// Absolute worktree path inside the sandbox.
    pub path: PathBuf,
    /// Handle to the execution environment the worktree lives in.
    pub sandbox: Arc<dyn SandboxHandle>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("path", &self.path)
            .field("sandbox_id", &self.sandbox.sandbox_id())
            .finish()
    }
}
