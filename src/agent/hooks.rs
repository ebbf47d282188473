//! Out-of-band event delivery into a running thread agent.
//!
//! A hook is a token-keyed queue: the agent creates it and consumes events,
//! the web layer resumes it whenever a new user message lands. Creating a
//! hook for a token that already has one supersedes the old queue, ending
//! the previous consumer.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

/// One inbound event: a user message was persisted at `sent_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadEvent {
    pub message_id: String,
    pub sent_at: DateTime<Utc>,
}

impl ThreadEvent {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            sent_at: Utc::now(),
        }
    }
}

/// Token-keyed hook queues.
#[derive(Default)]
pub struct ThreadHooks {
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<ThreadEvent>>>,
}

impl ThreadHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook for `token` and returns its event receiver.
    pub async fn create(&self, token: &str) -> mpsc::UnboundedReceiver<ThreadEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().await.insert(token.to_string(), tx);
        rx
    }

    /// Delivers an event to the hook for `token`. Returns whether a live
    /// consumer received it.
    pub async fn resume(&self, token: &str, event: ThreadEvent) -> bool {
        let senders = self.senders.lock().await;
        match senders.get(token) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Drops the hook for `token`, ending its consumer's event loop.
    pub async fn close(&self, token: &str) {
        self.senders.lock().await.remove(token);
    }
}
