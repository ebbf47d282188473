//! The model-invocation seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::agent::message::{AgentMessage, FinishReason};
use crate::error::Result;
use crate::tools::ToolSet;

/// Incremental output from a streaming model turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// A fragment of assistant text.
    Text { text: String },
    /// The model started a tool call.
    ToolCallStarted { tool_name: String, call_id: String },
    /// A tool call produced its result.
    ToolCallFinished { call_id: String, is_error: bool },
}

/// Everything one model turn needs.
#[derive(Clone)]
pub struct TurnRequest {
    pub system_prompt: String,
    pub messages: Vec<AgentMessage>,
    pub tools: ToolSet,
}

/// The explicit accumulator a turn returns: why it ended and which messages
/// it produced, including assistant text and completed tool-call records.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub finish_reason: FinishReason,
    pub new_messages: Vec<AgentMessage>,
}

/// A streaming model client.
///
/// Implementations execute any tool calls against the request's tool set
/// themselves and fold the results into the outcome; the orchestrator never
/// sees partial tool state.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Runs one model turn.
    ///
    /// Output is streamed to the provided channel as it is produced; the
    /// outcome carries the finish reason and the turn's new messages.
    /// Invocation failures propagate as errors and are not retried here.
    async fn stream_turn(
        &self,
        request: TurnRequest,
        output_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<TurnOutcome>;

    /// Returns the name of this client.
    fn name(&self) -> &str;
}
