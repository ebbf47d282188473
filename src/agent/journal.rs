//! Run journal: where is each run, and where did dead ones stop.
//!
//! One record per thread in the key-value store, rewritten after every step.
//! A run that dies mid-loop leaves its last `Stepping` record behind, which
//! is exactly what an operator (or a future resume path) needs to see.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::store::KeyValueStore;

const KEY_VERSION: &str = "v1";

fn run_key(thread_id: &str) -> String {
    format!("run:{KEY_VERSION}:{thread_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Provisioning,
    Stepping,
    Done,
    Interrupted,
}

/// The journal row for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub thread_id: String,
    /// Steps completed so far.
    pub step: u32,
    pub phase: RunPhase,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// A fresh record for a run that just accepted an event.
    pub fn started(thread_id: &str) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            step: 0,
            phase: RunPhase::Provisioning,
            updated_at: Utc::now(),
        }
    }

    /// The same run advanced to `phase` with `step` steps completed.
    pub fn advanced(&self, phase: RunPhase, step: u32) -> Self {
        Self {
            run_id: self.run_id.clone(),
            thread_id: self.thread_id.clone(),
            step,
            phase,
            updated_at: Utc::now(),
        }
    }
}

/// Persists run progress through the shared store.
#[derive(Clone)]
pub struct RunJournal {
    store: Arc<dyn KeyValueStore>,
}

impl RunJournal {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Writes the record, superseding any previous one for the thread.
    pub async fn record(&self, record: &RunRecord) -> Result<()> {
        self.store
            .set(
                &run_key(&record.thread_id),
                serde_json::to_value(record)?,
                None,
            )
            .await
    }

    /// The latest record for a thread, if any run has journaled.
    pub async fn latest(&self, thread_id: &str) -> Result<Option<RunRecord>> {
        let value = self.store.get(&run_key(thread_id)).await?;
        match value {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn journal() -> RunJournal {
        RunJournal::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn records_supersede_per_thread() {
        let journal = journal();
        let started = RunRecord::started("thread-1");
        journal.record(&started).await.unwrap();

        journal
            .record(&started.advanced(RunPhase::Stepping, 3))
            .await
            .unwrap();

        let latest = journal.latest("thread-1").await.unwrap().unwrap();
        assert_eq!(latest.run_id, started.run_id);
        assert_eq!(latest.phase, RunPhase::Stepping);
        assert_eq!(latest.step, 3);
    }

    #[tokio::test]
    async fn threads_journal_independently() {
        let journal = journal();
        journal.record(&RunRecord::started("a")).await.unwrap();

        assert!(journal.latest("b").await.unwrap().is_none());
        assert_eq!(
            journal.latest("a").await.unwrap().map(|r| r.phase),
            Some(RunPhase::Provisioning)
        );
    }

    #[tokio::test]
    async fn a_new_run_gets_a_new_run_id() {
        let journal = journal();
        let first = RunRecord::started("thread-1");
        journal.record(&first).await.unwrap();
        journal
            .record(&first.advanced(RunPhase::Done, 2))
            .await
            .unwrap();

        let second = RunRecord::started("thread-1");
        journal.record(&second).await.unwrap();

        let latest = journal.latest("thread-1").await.unwrap().unwrap();
        assert_ne!(latest.run_id, first.run_id);
        assert_eq!(latest.phase, RunPhase::Provisioning);
    }
}
