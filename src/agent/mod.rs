//! Agent orchestration: messages, model seam, step loops, and the
//! stream/interrupt bookkeeping they share.

mod hooks;
mod journal;
mod message;
mod model;
mod output;
mod response;
mod store;
mod streams;
mod thread;
mod thread_tree;

pub use hooks::{ThreadEvent, ThreadHooks};
pub use journal::{RunJournal, RunPhase, RunRecord};
pub use message::{AgentMessage, FinishReason, MessagePart, Role};
pub use model::{ModelClient, StreamChunk, TurnOutcome, TurnRequest};
pub use output::{OutputStreams, OutputSubscription};
pub use response::ResponseAgent;
pub use store::{CommentContext, CommentRecord, ConversationStore, PostSnapshot};
pub use streams::{InterruptRegistry, StreamRegistry};
pub use thread::{EventOutcome, ThreadAgent, INTERRUPTED_NOTE};
pub use thread_tree::CommentTree;
