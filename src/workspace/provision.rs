//! Workspace resolution: one shared sandbox per repository, one worktree per
//! ref, converged by the idempotent setup script.

use std::path::PathBuf;
use std::sync::Arc;

use crate::backoff::ContentionBackoff;
use crate::config::AgentSettings;
use crate::error::{Error, Result};
use crate::sandbox::{SandboxDriver, SandboxHandle, SandboxLookup, SandboxRegistry, SandboxSpec};
use crate::store::KeyValueStore;

use super::script::{parse_worktree_path, setup_script};
use super::{GitContext, Workspace};

/// Bound on consecutive dead-record fixups so a broken store cannot spin the
/// resolution loop forever. Fixups are not charged against the contention
/// backoff budget.
const MAX_STALE_FIXUPS: u32 = 32;

/// Resolves git contexts into ready workspaces.
///
/// Owns the sandbox registry, the driver for the execution environment, and
/// the contention policy. Stateless between calls; everything durable lives
/// in the store.
pub struct WorkspaceManager {
    registry: SandboxRegistry,
    driver: Arc<dyn SandboxDriver>,
    settings: AgentSettings,
}

impl WorkspaceManager {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        driver: Arc<dyn SandboxDriver>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            registry: SandboxRegistry::new(store),
            driver,
            settings,
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Returns a ready-to-use workspace for the context.
    ///
    /// A caller that remembers a sandbox id from an earlier step passes it in
    /// to skip registry resolution; if that sandbox is gone the call falls
    /// back to shared-sandbox resolution instead of failing.
    pub async fn get_workspace(
        &self,
        sandbox_id: Option<&str>,
        ctx: &GitContext,
    ) -> Result<Workspace> {
        let sandbox = match sandbox_id {
            Some(id) => self.retrieve_and_extend(id, ctx).await,
            None => None,
        };
        let sandbox = match sandbox {
            Some(sandbox) => sandbox,
            None => self.get_or_create_shared_sandbox(ctx).await?,
        };
        self.initialize_worktree(&sandbox, ctx).await
    }

    /// Reuses a live sandbox, refreshing its idle deadline and the registry
    /// record. `None` means the sandbox is unusable and resolution should
    /// continue elsewhere.
    async fn retrieve_and_extend(
        &self,
        sandbox_id: &str,
        ctx: &GitContext,
    ) -> Option<Arc<dyn SandboxHandle>> {
        let sandbox = match self.driver.get(sandbox_id).await {
            Ok(Some(sandbox)) => sandbox,
            Ok(None) => {
                tracing::debug!(sandbox_id = %sandbox_id, "sandbox no longer live");
                return None;
            }
            Err(e) => {
                tracing::warn!(sandbox_id = %sandbox_id, error = %e, "sandbox retrieval failed");
                return None;
            }
        };
        if let Err(e) = sandbox.extend_timeout(self.settings.sandbox_idle_ttl).await {
            tracing::warn!(sandbox_id = %sandbox_id, error = %e, "could not extend sandbox deadline");
            return None;
        }
        if let Err(e) = self
            .registry
            .extend_sandbox_ttl(&ctx.owner, &ctx.repo, self.settings.sandbox_idle_ttl)
            .await
        {
            tracing::warn!(owner = %ctx.owner, repo = %ctx.repo, error = %e, "could not extend registry ttl");
        }
        Some(sandbox)
    }

    /// Resolves the one shared sandbox for (owner, repo), creating it when
    /// this caller wins the creation lock and backing off while another
    /// caller holds it.
    async fn get_or_create_shared_sandbox(
        &self,
        ctx: &GitContext,
    ) -> Result<Arc<dyn SandboxHandle>> {
        let mut backoff = ContentionBackoff::new(
            self.settings.backoff_base,
            self.settings.backoff_max,
            self.settings.backoff_attempts,
        );
        let mut stale_fixups = 0u32;

        loop {
            let lookup = self
                .registry
                .get_or_lock_sandbox(&ctx.owner, &ctx.repo, self.settings.sandbox_lock_ttl)
                .await?;

            match lookup {
                SandboxLookup::Existing(sandbox_id) => {
                    if let Some(sandbox) = self.retrieve_and_extend(&sandbox_id, ctx).await {
                        return Ok(sandbox);
                    }
                    // The registry points at a dead sandbox. Removing it is a
                    // correctness fixup, not contention, so it does not touch
                    // the backoff budget.
                    stale_fixups += 1;
                    if stale_fixups > MAX_STALE_FIXUPS {
                        return Err(Error::Provisioning {
                            owner: ctx.owner.clone(),
                            repo: ctx.repo.clone(),
                            reason: "registry kept resolving to dead sandboxes".to_string(),
                        });
                    }
                    self.registry
                        .remove_sandbox_if(&ctx.owner, &ctx.repo, &sandbox_id)
                        .await?;
                }
                SandboxLookup::MustCreate => {
                    return match self.create_shared_sandbox(ctx).await {
                        Ok(sandbox) => Ok(sandbox),
                        Err(e) => {
                            if let Err(release_err) =
                                self.registry.release_sandbox_lock(&ctx.owner, &ctx.repo).await
                            {
                                tracing::warn!(
                                    owner = %ctx.owner,
                                    repo = %ctx.repo,
                                    error = %release_err,
                                    "failed to release creation lock after create failure"
                                );
                            }
                            Err(e)
                        }
                    };
                }
                SandboxLookup::Locked => {
                    if backoff.exhausted() {
                        tracing::warn!(
                            owner = %ctx.owner,
                            repo = %ctx.repo,
                            attempts = backoff.attempt(),
                            "gave up waiting for another sandbox creator"
                        );
                        return Err(Error::ContentionTimeout {
                            owner: ctx.owner.clone(),
                            repo: ctx.repo.clone(),
                            attempts: backoff.attempt(),
                        });
                    }
                    let delay = backoff.jittered();
                    tracing::debug!(
                        owner = %ctx.owner,
                        repo = %ctx.repo,
                        attempt = backoff.attempt() + 1,
                        delay_ms = delay.as_millis() as u64,
                        "sandbox creation locked elsewhere, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    backoff.next();
                }
            }
        }
    }

    async fn create_shared_sandbox(&self, ctx: &GitContext) -> Result<Arc<dyn SandboxHandle>> {
        let spec = SandboxSpec {
            vcpus: self.settings.sandbox_vcpus,
            timeout: self.settings.sandbox_idle_ttl,
        };
        let sandbox = self.driver.create(&spec).await?;
        self.registry
            .store_sandbox(
                &ctx.owner,
                &ctx.repo,
                sandbox.sandbox_id(),
                self.settings.sandbox_idle_ttl,
            )
            .await?;
        Ok(sandbox)
    }

    /// Runs the idempotent setup script and binds its worktree path to the
    /// sandbox.
    async fn initialize_worktree(
        &self,
        sandbox: &Arc<dyn SandboxHandle>,
        ctx: &GitContext,
    ) -> Result<Workspace> {
        let script = setup_script(&self.settings.git_remote_base, ctx);
        let output = sandbox
            .run_command("sh", &["-c".to_string(), script])
            .await?;

        if !output.success() {
            return Err(Error::Provisioning {
                owner: ctx.owner.clone(),
                repo: ctx.repo.clone(),
                reason: format!(
                    "setup script exited {}: {}",
                    output.exit_code,
                    tail(&output.stderr, 500)
                ),
            });
        }

        let Some(path) = parse_worktree_path(&output.stdout) else {
            return Err(Error::Provisioning {
                owner: ctx.owner.clone(),
                repo: ctx.repo.clone(),
                reason: "setup script produced no worktree path".to_string(),
            });
        };

        tracing::info!(
            owner = %ctx.owner,
            repo = %ctx.repo,
            sandbox_id = %sandbox.sandbox_id(),
            path = %path,
            "workspace ready"
        );

        Ok(Workspace {
            path: PathBuf::from(path),
            sandbox: Arc::clone(sandbox),
        })
    }
}

/// Last `max_chars` characters of `text`, for error excerpts.
fn tail(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        trimmed.to_string()
    } else {
        let kept: String = trimmed.chars().skip(count - max_chars).collect();
        format!("...{kept}")
    }
}
