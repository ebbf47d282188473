//! Process-backed sandbox driver for local development and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result};

use super::driver::{CommandOutput, SandboxDriver, SandboxHandle, SandboxSpec};

/// One local sandbox: a scratch directory plus an idle deadline.
pub struct LocalSandbox {
    sandbox_id: String,
    root: PathBuf,
    deadline: Mutex<Instant>,
    /// One command at a time per sandbox; concurrent callers queue.
    console: Mutex<()>,
}

impl LocalSandbox {
    /// Root directory commands run in.
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    async fn expired(&self) -> bool {
        Instant::now() >= *self.deadline.lock().await
    }
}

#[async_trait]
impl SandboxHandle for LocalSandbox {
    fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    async fn run_command(&self, command: &str, args: &[String]) -> Result<CommandOutput> {
        let _console = self.console.lock().await;
        let output = tokio::process::Command::new(command)
            .args(args)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|e| Error::SandboxCommand(format!("{command}: {e}")))?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn extend_timeout(&self, duration: Duration) -> Result<()> {
        let mut deadline = self.deadline.lock().await;
        *deadline = Instant::now() + duration;
        Ok(())
    }
}

/// Driver that backs each sandbox with a scratch directory on the host.
///
/// Commands run through `tokio::process` rooted at the sandbox directory,
/// serially per sandbox. Expiry is bookkeeping only: an expired sandbox
/// stops being retrievable and its directory is removed, nothing preempts
/// in-flight commands.
pub struct LocalSandboxes {
    /// Base directory for sandbox roots. If None, uses a temp directory.
    base_dir: Option<PathBuf>,
    sandboxes: Mutex<HashMap<String, Arc<LocalSandbox>>>,
    /// Counter for generating unique sandbox ids.
    counter: AtomicU64,
}

impl LocalSandboxes {
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self {
            base_dir,
            sandboxes: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    fn generate_sandbox_id(&self) -> String {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        format!("sbx-{}-{}", timestamp, id)
    }

    fn sandbox_root(&self, sandbox_id: &str) -> Result<PathBuf> {
        let base = match &self.base_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir().join("colloquy-sandboxes"),
        };
        std::fs::create_dir_all(&base)?;
        Ok(base.join(sandbox_id))
    }
}

#[async_trait]
impl SandboxDriver for LocalSandboxes {
    async fn create(&self, spec: &SandboxSpec) -> Result<Arc<dyn SandboxHandle>> {
        let sandbox_id = self.generate_sandbox_id();
        let root = self.sandbox_root(&sandbox_id)?;
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::SandboxCreation(format!("{}: {e}", root.display())))?;

        let sandbox = Arc::new(LocalSandbox {
            sandbox_id: sandbox_id.clone(),
            root,
            deadline: Mutex::new(Instant::now() + spec.timeout),
            console: Mutex::new(()),
        });

        let mut sandboxes = self.sandboxes.lock().await;
        sandboxes.insert(sandbox_id.clone(), Arc::clone(&sandbox));
        tracing::info!(sandbox_id = %sandbox_id, path = ?sandbox.root, "created local sandbox");
        Ok(sandbox)
    }

    async fn get(&self, sandbox_id: &str) -> Result<Option<Arc<dyn SandboxHandle>>> {
        let mut sandboxes = self.sandboxes.lock().await;
        let Some(sandbox) = sandboxes.get(sandbox_id).cloned() else {
            return Ok(None);
        };
        if sandbox.expired().await {
            sandboxes.remove(sandbox_id);
            if let Err(e) = std::fs::remove_dir_all(&sandbox.root) {
                tracing::warn!(
                    sandbox_id = %sandbox_id,
                    error = %e,
                    "failed to remove expired sandbox directory"
                );
            }
            return Ok(None);
        }
        Ok(Some(sandbox as Arc<dyn SandboxHandle>))
    }
}
