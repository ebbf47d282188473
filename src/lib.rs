//! Colloquy - agent orchestration over sandboxed git workspaces
//!
//! This library provides the core for repository discussion threads answered
//! by agents with the code in front of them: a distributed sandbox registry
//! over a shared key-value store, a workspace provisioner that converges git
//! worktrees inside shared sandboxes, a read-only tool surface bound to a
//! workspace, and the bounded step loops that drive streaming model turns.

pub mod agent;
pub mod backoff;
pub mod config;
pub mod error;
pub mod prompt;
pub mod sandbox;
pub mod store;
pub mod testing;
pub mod tools;
pub mod workspace;

pub use error::{Error, Result};

pub use agent::{
    AgentMessage, CommentContext, CommentRecord, CommentTree, ConversationStore, EventOutcome,
    FinishReason, InterruptRegistry, MessagePart, ModelClient, OutputStreams, OutputSubscription,
    PostSnapshot, ResponseAgent, Role, RunJournal, RunPhase, RunRecord, StreamChunk,
    StreamRegistry, ThreadAgent, ThreadEvent, ThreadHooks, TurnOutcome, TurnRequest,
};
pub use backoff::ContentionBackoff;
pub use config::{AgentSettings, Validate, ValidationResult};
pub use sandbox::{
    CommandOutput, LocalSandbox, LocalSandboxes, SandboxDriver, SandboxHandle, SandboxLookup,
    SandboxRecord, SandboxRegistry, SandboxSpec,
};
pub use store::{GetOrLock, KeyValueStore, MemoryStore};
pub use tools::{get_tools, get_tools_with_limit, Tool, ToolResult, ToolSet};
pub use workspace::{GitContext, Workspace, WorkspaceManager};
