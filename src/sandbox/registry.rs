//! Shared per-repository sandbox registry with a creation lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::store::{GetOrLock, KeyValueStore};

/// Bumped when the record layout changes; old records age out by key.
const KEY_VERSION: &str = "v1";

/// Registry entry for the one live sandbox shared per (owner, repo).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxRecord {
    pub sandbox_id: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of the atomic registry lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxLookup {
    /// A sandbox record already exists for this repository.
    Existing(String),
    /// No record; the caller holds the creation lock and must create one.
    MustCreate,
    /// No record; another caller is creating one right now.
    Locked,
}

/// Registry of shared sandboxes, keyed by repository.
///
/// All mutations go through the store's atomic combined operations, so at
/// most one creator proceeds per repository at a time and a reader can never
/// observe the creation lock cleared without the record present.
pub struct SandboxRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl SandboxRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn record_key(owner: &str, repo: &str) -> String {
        format!("sandbox:{KEY_VERSION}:{owner}:{repo}")
    }

    fn lock_key(owner: &str, repo: &str) -> String {
        format!("{}:lock", Self::record_key(owner, repo))
    }

    /// Atomically returns the existing sandbox for (owner, repo) or decides
    /// who creates one: the caller (lock acquired) or somebody else (locked).
    pub async fn get_or_lock_sandbox(
        &self,
        owner: &str,
        repo: &str,
        lock_ttl: Duration,
    ) -> Result<SandboxLookup> {
        let outcome = self
            .store
            .get_or_lock(
                &Self::record_key(owner, repo),
                &Self::lock_key(owner, repo),
                lock_ttl,
            )
            .await?;

        match outcome {
            GetOrLock::Found(value) => {
                let record: SandboxRecord = serde_json::from_value(value)?;
                Ok(SandboxLookup::Existing(record.sandbox_id))
            }
            GetOrLock::LockAcquired => Ok(SandboxLookup::MustCreate),
            GetOrLock::Locked => Ok(SandboxLookup::Locked),
        }
    }

    /// Publishes a freshly created sandbox and releases the creation lock in
    /// one atomic operation.
    pub async fn store_sandbox(
        &self,
        owner: &str,
        repo: &str,
        sandbox_id: &str,
        ttl: Duration,
    ) -> Result<()> {
        let record = SandboxRecord {
            sandbox_id: sandbox_id.to_string(),
            created_at: Utc::now(),
        };
        self.store
            .set_and_delete(
                &Self::record_key(owner, repo),
                serde_json::to_value(&record)?,
                Some(ttl),
                &Self::lock_key(owner, repo),
            )
            .await?;
        tracing::info!(owner = %owner, repo = %repo, sandbox_id = %sandbox_id, "registered shared sandbox");
        Ok(())
    }

    /// Compare-and-delete: removes the registry entry only while it still
    /// points at `expected_id`, so a stale caller cannot delete a newer
    /// sandbox that already replaced it. Returns whether a removal happened.
    pub async fn remove_sandbox_if(
        &self,
        owner: &str,
        repo: &str,
        expected_id: &str,
    ) -> Result<bool> {
        let removed = self
            .store
            .delete_if_eq(
                &Self::record_key(owner, repo),
                Some("sandbox_id"),
                expected_id,
            )
            .await?;
        if removed {
            tracing::info!(owner = %owner, repo = %repo, sandbox_id = %expected_id, "removed stale sandbox record");
        }
        Ok(removed)
    }

    /// Bumps the record's TTL to match a sandbox whose own deadline was just
    /// extended.
    pub async fn extend_sandbox_ttl(&self, owner: &str, repo: &str, ttl: Duration) -> Result<()> {
        self.store
            .expire(&Self::record_key(owner, repo), ttl)
            .await
    }

    /// Releases the creation lock without publishing a record. Called when
    /// creation fails so other waiters are not stuck until lock expiry.
    pub async fn release_sandbox_lock(&self, owner: &str, repo: &str) -> Result<()> {
        self.store.delete(&Self::lock_key(owner, repo)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> SandboxRegistry {
        SandboxRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn keys_are_versioned_and_scoped_by_repo() {
        assert_eq!(
            SandboxRegistry::record_key("acme", "widgets"),
            "sandbox:v1:acme:widgets"
        );
        assert_eq!(
            SandboxRegistry::lock_key("acme", "widgets"),
            "sandbox:v1:acme:widgets:lock"
        );
    }

    #[tokio::test]
    async fn first_lookup_acquires_creation_lock() {
        let registry = registry();
        let outcome = registry
            .get_or_lock_sandbox("acme", "widgets", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(outcome, SandboxLookup::MustCreate);
    }

    #[tokio::test]
    async fn second_lookup_sees_lock_contention() {
        let registry = registry();
        registry
            .get_or_lock_sandbox("acme", "widgets", Duration::from_secs(30))
            .await
            .unwrap();
        let outcome = registry
            .get_or_lock_sandbox("acme", "widgets", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(outcome, SandboxLookup::Locked);
    }

    #[tokio::test]
    async fn lookup_after_store_returns_existing_sandbox() {
        let registry = registry();
        registry
            .get_or_lock_sandbox("acme", "widgets", Duration::from_secs(30))
            .await
            .unwrap();
        registry
            .store_sandbox("acme", "widgets", "sbx-1", Duration::from_secs(600))
            .await
            .unwrap();

        let outcome = registry
            .get_or_lock_sandbox("acme", "widgets", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(outcome, SandboxLookup::Existing("sbx-1".to_string()));
    }

    #[tokio::test]
    async fn repositories_do_not_share_locks() {
        let registry = registry();
        registry
            .get_or_lock_sandbox("acme", "widgets", Duration::from_secs(30))
            .await
            .unwrap();
        let other = registry
            .get_or_lock_sandbox("acme", "gadgets", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(other, SandboxLookup::MustCreate);
    }

    #[tokio::test]
    async fn remove_sandbox_if_ignores_mismatched_id() {
        let registry = registry();
        registry
            .store_sandbox("acme", "widgets", "sbx-new", Duration::from_secs(600))
            .await
            .unwrap();

        let removed = registry
            .remove_sandbox_if("acme", "widgets", "sbx-old")
            .await
            .unwrap();

        assert!(!removed);
        let outcome = registry
            .get_or_lock_sandbox("acme", "widgets", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(outcome, SandboxLookup::Existing("sbx-new".to_string()));
    }

    #[tokio::test]
    async fn remove_sandbox_if_deletes_matching_id() {
        let registry = registry();
        registry
            .store_sandbox("acme", "widgets", "sbx-1", Duration::from_secs(600))
            .await
            .unwrap();

        let removed = registry
            .remove_sandbox_if("acme", "widgets", "sbx-1")
            .await
            .unwrap();

        assert!(removed);
        let outcome = registry
            .get_or_lock_sandbox("acme", "widgets", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(outcome, SandboxLookup::MustCreate);
    }

    #[tokio::test]
    async fn release_lock_lets_next_caller_create() {
        let registry = registry();
        registry
            .get_or_lock_sandbox("acme", "widgets", Duration::from_secs(30))
            .await
            .unwrap();
        registry.release_sandbox_lock("acme", "widgets").await.unwrap();

        let outcome = registry
            .get_or_lock_sandbox("acme", "widgets", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(outcome, SandboxLookup::MustCreate);
    }

    #[tokio::test(start_paused = true)]
    async fn extend_sandbox_ttl_keeps_record_alive() {
        let registry = registry();
        registry
            .store_sandbox("acme", "widgets", "sbx-1", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        registry
            .extend_sandbox_ttl("acme", "widgets", Duration::from_secs(600))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(120)).await;

        let outcome = registry
            .get_or_lock_sandbox("acme", "widgets", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(outcome, SandboxLookup::Existing("sbx-1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn record_expires_with_its_ttl() {
        let registry = registry();
        registry
            .store_sandbox("acme", "widgets", "sbx-1", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        let outcome = registry
            .get_or_lock_sandbox("acme", "widgets", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(outcome, SandboxLookup::MustCreate);
    }

    #[tokio::test]
    async fn concurrent_lookups_elect_exactly_one_creator() {
        let registry = Arc::new(registry());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry
                    .get_or_lock_sandbox("acme", "widgets", Duration::from_secs(30))
                    .await
                    .unwrap()
            }));
        }

        let mut creators = 0;
        for handle in handles {
            if handle.await.unwrap() == SandboxLookup::MustCreate {
                creators += 1;
            }
        }
        assert_eq!(creators, 1);
    }
}
