//! Sandbox driver traits and types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Resource description for a new sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSpec {
    /// Number of virtual CPUs to request.
    pub vcpus: u32,

    /// Idle timeout after which the environment reclaims the sandbox.
    pub timeout: Duration,
}

impl Default for SandboxSpec {
    fn default() -> Self {
        Self {
            vcpus: 2,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Captured output of one command run inside a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// True when the command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An active sandboxed execution environment.
///
/// Handles are shared across concurrent conversations about the same
/// repository, so `run_command` must tolerate interleaved invocations.
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    /// Stable identifier, usable with [`SandboxDriver::get`] later.
    fn sandbox_id(&self) -> &str;

    /// Runs a command inside the sandbox and captures its output.
    ///
    /// Non-zero exits are reported through [`CommandOutput`]; `Err` means the
    /// command could not be launched at all.
    async fn run_command(&self, command: &str, args: &[String]) -> Result<CommandOutput>;

    /// Pushes the sandbox idle deadline out to `duration` from now.
    async fn extend_timeout(&self, duration: Duration) -> Result<()>;
}

/// Driver for creating and retrieving sandboxes.
#[async_trait]
pub trait SandboxDriver: Send + Sync {
    /// Creates a new sandbox with the given resource spec.
    async fn create(&self, spec: &SandboxSpec) -> Result<Arc<dyn SandboxHandle>>;

    /// Retrieves a live sandbox by id; `None` when it has expired or never
    /// existed.
    async fn get(&self, sandbox_id: &str) -> Result<Option<Arc<dyn SandboxHandle>>>;
}
