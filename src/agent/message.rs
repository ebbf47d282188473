//! Conversation messages and their typed parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One piece of a message.
///
/// Every consumption site matches exhaustively, so adding a variant forces
/// renderers and extractors to handle it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    ToolCall {
        tool_name: String,
        call_id: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alt: Option<String>,
    },
}

/// A persisted conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub created_at: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(role: Role, parts: Vec<MessagePart>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            parts,
            created_at: Utc::now(),
        }
    }

    /// A plain-text user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![MessagePart::Text { text: text.into() }])
    }

    /// A plain-text assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(
            Role::Assistant,
            vec![MessagePart::Text { text: text.into() }],
        )
    }

    /// Concatenated text content, ignoring non-text parts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                MessagePart::Text { text } => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
                MessagePart::ToolCall { .. } | MessagePart::Image { .. } => {}
            }
        }
        out
    }
}

/// Why a model turn (or the surrounding loop) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// The model finished its reply.
    Stop,
    /// The turn ended on pending tool calls and the loop should continue.
    ToolCalls,
    /// The turn hit a token limit and the loop should continue.
    Length,
    /// An interrupt marker predated any streamed output.
    InterruptedBeforeStream,
    /// An interrupt marker arrived after output had streamed.
    InterruptedMidStream,
}

impl FinishReason {
    /// Whether the step loop stops on this reason.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FinishReason::Stop
                | FinishReason::InterruptedBeforeStream
                | FinishReason::InterruptedMidStream
        )
    }
}
