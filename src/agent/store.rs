//! The conversation-store seam: persisted messages, posts, and comments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::message::AgentMessage;
use crate::error::Result;

/// The post a comment discussion hangs off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostSnapshot {
    pub id: String,
    pub title: String,
    pub body: String,
}

/// One comment row, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: String,
    pub parent_id: Option<String>,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A post plus every comment under it, unordered.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentContext {
    pub post: PostSnapshot,
    pub comments: Vec<CommentRecord>,
}

/// Durable conversation storage.
///
/// Message order is append order; `list_messages` returns them oldest first.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Appends messages to a thread, preserving their order.
    async fn append_messages(&self, thread_id: &str, messages: &[AgentMessage]) -> Result<()>;

    /// All messages of a thread, ordered by creation.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<AgentMessage>>;

    /// The post and comments surrounding one comment.
    async fn comment_context(&self, post_id: &str, comment_id: &str) -> Result<CommentContext>;

    /// Terminal write for a response run: stores the produced messages on the
    /// comment record and clears its stream pointer in the same update.
    async fn complete_comment(&self, comment_id: &str, messages: &[AgentMessage]) -> Result<()>;
}
