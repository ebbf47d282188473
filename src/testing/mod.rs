//! Test doubles for the crate's seams.
//!
//! These back both the inline unit tests and the integration tests: a
//! scriptable sandbox driver, a scripted model client, and an in-memory
//! conversation store. Everything here is deterministic and offline.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::{Mutex, Semaphore};

use crate::agent::{
    AgentMessage, CommentContext, CommentRecord, ConversationStore, FinishReason, MessagePart,
    ModelClient, PostSnapshot, Role, StreamChunk, TurnOutcome, TurnRequest,
};
use crate::error::{Error, Result};
use crate::sandbox::{CommandOutput, SandboxDriver, SandboxHandle, SandboxSpec};

/// A sandbox whose command outputs are scripted.
///
/// `run_command` pops the next queued output, falling back to the default
/// output once the queue is empty, and records every invocation so tests can
/// assert on the transcript.
pub struct FakeSandbox {
    sandbox_id: String,
    default_output: Mutex<CommandOutput>,
    queued: Mutex<VecDeque<CommandOutput>>,
    commands: Mutex<Vec<(String, Vec<String>)>>,
    extensions: Mutex<Vec<Duration>>,
}

impl FakeSandbox {
    fn new(sandbox_id: &str, default_output: CommandOutput) -> Arc<Self> {
        Arc::new(Self {
            sandbox_id: sandbox_id.to_string(),
            default_output: Mutex::new(default_output),
            queued: Mutex::new(VecDeque::new()),
            commands: Mutex::new(Vec::new()),
            extensions: Mutex::new(Vec::new()),
        })
    }

    /// A sandbox detached from any driver, for tool-level tests.
    pub fn standalone(sandbox_id: &str) -> Arc<Self> {
        Self::new(sandbox_id, default_setup_output(sandbox_id))
    }

    /// Queue the output for the next command.
    pub async fn push_output(&self, output: CommandOutput) {
        self.queued.lock().await.push_back(output);
    }

    /// Replace the fallback output used once the queue is drained.
    pub async fn set_default_output(&self, output: CommandOutput) {
        *self.default_output.lock().await = output;
    }

    /// Every command run so far, as (command, args) pairs.
    pub async fn commands(&self) -> Vec<(String, Vec<String>)> {
        self.commands.lock().await.clone()
    }

    /// Every timeout extension granted so far.
    pub async fn extensions(&self) -> Vec<Duration> {
        self.extensions.lock().await.clone()
    }
}

#[async_trait]
impl SandboxHandle for FakeSandbox {
    fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    async fn run_command(&self, command: &str, args: &[String]) -> Result<CommandOutput> {
        self.commands
            .lock()
            .await
            .push((command.to_string(), args.to_vec()));
        match self.queued.lock().await.pop_front() {
            Some(output) => Ok(output),
            None => Ok(self.default_output.lock().await.clone()),
        }
    }

    async fn extend_timeout(&self, duration: Duration) -> Result<()> {
        self.extensions.lock().await.push(duration);
        Ok(())
    }
}

/// The setup-script output a healthy fake sandbox prints: the absolute
/// worktree path on the last line.
fn default_setup_output(sandbox_id: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: format!("/sandbox/{sandbox_id}/worktrees/main\n"),
        stderr: String::new(),
    }
}

/// An in-memory sandbox driver over [`FakeSandbox`] instances.
pub struct FakeSandboxes {
    sandboxes: Mutex<HashMap<String, Arc<FakeSandbox>>>,
    counter: AtomicU64,
    create_count: Mutex<u32>,
    failures_remaining: Mutex<u32>,
    default_output: Mutex<Option<CommandOutput>>,
}

impl FakeSandboxes {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self {
            sandboxes: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
            create_count: Mutex::new(0),
            failures_remaining: Mutex::new(0),
            default_output: Mutex::new(None),
        })
    }

    /// How many sandboxes the driver has created.
    pub async fn create_count(&self) -> u32 {
        *self.create_count.lock().await
    }

    /// Make the next `n` create calls fail.
    pub async fn fail_next_creates(&self, n: u32) {
        *self.failures_remaining.lock().await = n;
    }

    /// Default command output for sandboxes created from here on.
    pub async fn set_default_output(&self, output: CommandOutput) {
        *self.default_output.lock().await = Some(output);
    }

    /// Look up a created sandbox as its concrete fake type.
    pub async fn sandbox(&self, sandbox_id: &str) -> Option<Arc<FakeSandbox>> {
        self.sandboxes.lock().await.get(sandbox_id).cloned()
    }

    /// Drop a sandbox so later lookups see it as expired.
    pub async fn forget(&self, sandbox_id: &str) {
        self.sandboxes.lock().await.remove(sandbox_id);
    }
}

#[async_trait]
impl SandboxDriver for FakeSandboxes {
    async fn create(&self, _spec: &SandboxSpec) -> Result<Arc<dyn SandboxHandle>> {
        {
            let mut failures = self.failures_remaining.lock().await;
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::SandboxCreation(
                    "injected create failure".to_string(),
                ));
            }
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let sandbox_id = format!("sbx-fake-{n}");
        let output = self
            .default_output
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| default_setup_output(&sandbox_id));
        let sandbox = FakeSandbox::new(&sandbox_id, output);

        self.sandboxes
            .lock()
            .await
            .insert(sandbox_id.clone(), Arc::clone(&sandbox));
        *self.create_count.lock().await += 1;
        Ok(sandbox)
    }

    async fn get(&self, sandbox_id: &str) -> Result<Option<Arc<dyn SandboxHandle>>> {
        Ok(self
            .sandboxes
            .lock()
            .await
            .get(sandbox_id)
            .map(|s| Arc::clone(s) as Arc<dyn SandboxHandle>))
    }
}

enum ScriptedTurn {
    Text {
        text: String,
        finish: FinishReason,
    },
    ToolCall {
        tool_name: String,
        input: Value,
    },
}

/// What a [`ScriptedModel`] saw in one request.
#[derive(Debug, Clone, PartialEq)]
pub struct SeenRequest {
    pub system_prompt: String,
    pub message_texts: Vec<String>,
}

/// A model client that replays scripted turns.
///
/// Tool turns execute the named tool against the request's tool set, so the
/// whole tool path is exercised without a real model. Once the script is
/// drained, every further call returns the `always` reason if one is set,
/// otherwise a plain "Done." with finish reason stop.
pub struct ScriptedModel {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    always: Mutex<Option<FinishReason>>,
    fail_next: Mutex<Option<String>>,
    calls: Mutex<u32>,
    requests: Mutex<Vec<SeenRequest>>,
}

impl ScriptedModel {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(VecDeque::new()),
            always: Mutex::new(None),
            fail_next: Mutex::new(None),
            calls: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Queue a plain text turn.
    pub async fn push_text_turn(&self, text: &str, finish: FinishReason) {
        self.turns.lock().await.push_back(ScriptedTurn::Text {
            text: text.to_string(),
            finish,
        });
    }

    /// Queue a turn that calls `tool_name` with `input` and ends on
    /// finish reason tool-calls.
    pub async fn push_tool_turn(&self, tool_name: &str, input: Value) {
        self.turns.lock().await.push_back(ScriptedTurn::ToolCall {
            tool_name: tool_name.to_string(),
            input,
        });
    }

    /// After the script drains, answer every call with this finish reason.
    pub async fn always(&self, finish: FinishReason) {
        *self.always.lock().await = Some(finish);
    }

    /// Make the next call fail with a model error.
    pub async fn fail_next(&self, message: &str) {
        *self.fail_next.lock().await = Some(message.to_string());
    }

    /// How many turns have been requested.
    pub async fn calls(&self) -> u32 {
        *self.calls.lock().await
    }

    /// Every request, in call order.
    pub async fn seen_requests(&self) -> Vec<SeenRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn stream_turn(
        &self,
        request: TurnRequest,
        output_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<TurnOutcome> {
        let call_index = {
            let mut calls = self.calls.lock().await;
            *calls += 1;
            *calls
        };
        self.requests.lock().await.push(SeenRequest {
            system_prompt: request.system_prompt.clone(),
            message_texts: request.messages.iter().map(|m| m.text()).collect(),
        });

        if let Some(message) = self.fail_next.lock().await.take() {
            return Err(Error::Model(message));
        }

        let turn = self.turns.lock().await.pop_front();
        match turn {
            Some(ScriptedTurn::Text { text, finish }) => {
                let _ = output_tx
                    .send(StreamChunk::Text { text: text.clone() })
                    .await;
                Ok(TurnOutcome {
                    finish_reason: finish,
                    new_messages: vec![AgentMessage::assistant(text)],
                })
            }
            Some(ScriptedTurn::ToolCall { tool_name, input }) => {
                let call_id = format!("call-{call_index}");
                let _ = output_tx
                    .send(StreamChunk::ToolCallStarted {
                        tool_name: tool_name.clone(),
                        call_id: call_id.clone(),
                    })
                    .await;
                let result = request.tools.execute(&tool_name, input.clone()).await;
                let _ = output_tx
                    .send(StreamChunk::ToolCallFinished {
                        call_id: call_id.clone(),
                        is_error: result.is_error,
                    })
                    .await;
                let message = AgentMessage::new(
                    Role::Assistant,
                    vec![MessagePart::ToolCall {
                        tool_name,
                        call_id,
                        input,
                        output: Some(result.output),
                        is_error: Some(result.is_error),
                    }],
                );
                Ok(TurnOutcome {
                    finish_reason: FinishReason::ToolCalls,
                    new_messages: vec![message],
                })
            }
            None => {
                let (text, finish) = match *self.always.lock().await {
                    Some(finish) => (format!("Step {call_index}."), finish),
                    None => ("Done.".to_string(), FinishReason::Stop),
                };
                let _ = output_tx
                    .send(StreamChunk::Text { text: text.clone() })
                    .await;
                Ok(TurnOutcome {
                    finish_reason: finish,
                    new_messages: vec![AgentMessage::assistant(text)],
                })
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// An in-process [`ConversationStore`].
///
/// Message fetches can be gated behind a semaphore so tests can hold a step
/// loop at its fetch boundary and act between steps deterministically.
pub struct MemoryConversations {
    threads: Mutex<HashMap<String, Vec<AgentMessage>>>,
    posts: Mutex<HashMap<String, (PostSnapshot, Vec<CommentRecord>)>>,
    completed: Mutex<HashMap<String, Vec<AgentMessage>>>,
    comment_streams: Mutex<HashMap<String, String>>,
    gated: Mutex<bool>,
    gate: Semaphore,
}

impl MemoryConversations {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self {
            threads: Mutex::new(HashMap::new()),
            posts: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
            comment_streams: Mutex::new(HashMap::new()),
            gated: Mutex::new(false),
            gate: Semaphore::new(0),
        })
    }

    /// Make every `list_messages` call wait for a permit from
    /// [`allow_lists`](Self::allow_lists).
    pub async fn gate_lists(&self) {
        *self.gated.lock().await = true;
    }

    /// Release `n` gated message fetches.
    pub async fn allow_lists(&self, n: u32) {
        self.gate.add_permits(n as usize);
    }

    /// Current messages of a thread.
    pub async fn messages(&self, thread_id: &str) -> Vec<AgentMessage> {
        self.threads
            .lock()
            .await
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Seed a post and its comments for response-agent runs.
    pub async fn seed_post(&self, post: PostSnapshot, comments: Vec<CommentRecord>) {
        self.posts
            .lock()
            .await
            .insert(post.id.clone(), (post, comments));
    }

    /// Set a comment's stream pointer, as the web layer does when it creates
    /// a placeholder reply.
    pub async fn set_comment_stream(&self, comment_id: &str, stream_id: &str) {
        self.comment_streams
            .lock()
            .await
            .insert(comment_id.to_string(), stream_id.to_string());
    }

    /// A comment's stream pointer, if still set.
    pub async fn comment_stream(&self, comment_id: &str) -> Option<String> {
        self.comment_streams.lock().await.get(comment_id).cloned()
    }

    /// Messages written onto a comment by a terminal response step.
    pub async fn completed(&self, comment_id: &str) -> Option<Vec<AgentMessage>> {
        self.completed.lock().await.get(comment_id).cloned()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversations {
    async fn append_messages(&self, thread_id: &str, messages: &[AgentMessage]) -> Result<()> {
        self.threads
            .lock()
            .await
            .entry(thread_id.to_string())
            .or_default()
            .extend_from_slice(messages);
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<AgentMessage>> {
        if *self.gated.lock().await {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| Error::Conversation("message gate closed".to_string()))?;
            permit.forget();
        }
        Ok(self.messages(thread_id).await)
    }

    async fn comment_context(&self, post_id: &str, _comment_id: &str) -> Result<CommentContext> {
        let posts = self.posts.lock().await;
        let (post, comments) = posts
            .get(post_id)
            .ok_or_else(|| Error::Conversation(format!("unknown post: {post_id}")))?;
        Ok(CommentContext {
            post: post.clone(),
            comments: comments.clone(),
        })
    }

    async fn complete_comment(&self, comment_id: &str, messages: &[AgentMessage]) -> Result<()> {
        self.completed
            .lock()
            .await
            .insert(comment_id.to_string(), messages.to_vec());
        self.comment_streams.lock().await.remove(comment_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::get_tools;
    use crate::workspace::Workspace;
    use std::path::PathBuf;

    #[tokio::test]
    async fn scripted_outputs_drain_before_the_default() {
        let sandbox = FakeSandbox::standalone("sbx-script");
        sandbox
            .push_output(CommandOutput {
                exit_code: 7,
                stdout: "first".to_string(),
                stderr: String::new(),
            })
            .await;

        let first = sandbox.run_command("true", &[]).await.unwrap();
        assert_eq!(first.exit_code, 7);

        let second = sandbox.run_command("true", &[]).await.unwrap();
        assert_eq!(second.exit_code, 0);
        assert!(second.stdout.contains("worktrees/main"));

        assert_eq!(sandbox.commands().await.len(), 2);
    }

    #[tokio::test]
    async fn driver_mints_unique_ids_and_tracks_creates() {
        let fakes = FakeSandboxes::shared();
        let spec = SandboxSpec::default();

        let a = fakes.create(&spec).await.unwrap();
        let b = fakes.create(&spec).await.unwrap();

        assert_ne!(a.sandbox_id(), b.sandbox_id());
        assert_eq!(fakes.create_count().await, 2);
        assert!(fakes.sandbox(a.sandbox_id()).await.is_some());
    }

    #[tokio::test]
    async fn injected_failures_consume_then_recover() {
        let fakes = FakeSandboxes::shared();
        let spec = SandboxSpec::default();

        fakes.fail_next_creates(1).await;
        assert!(fakes.create(&spec).await.is_err());
        assert!(fakes.create(&spec).await.is_ok());
        assert_eq!(fakes.create_count().await, 1);
    }

    #[tokio::test]
    async fn forgotten_sandboxes_read_as_expired() {
        let fakes = FakeSandboxes::shared();
        let sandbox = fakes.create(&SandboxSpec::default()).await.unwrap();
        let id = sandbox.sandbox_id().to_string();

        fakes.forget(&id).await;

        assert!(fakes.get(&id).await.unwrap().is_none());
    }

    fn request_for(sandbox: Arc<FakeSandbox>) -> TurnRequest {
        let workspace = Workspace {
            path: PathBuf::from("/sandbox/worktrees/main"),
            sandbox,
        };
        TurnRequest {
            system_prompt: "system".to_string(),
            messages: vec![AgentMessage::user("hello")],
            tools: get_tools(&workspace),
        }
    }

    #[tokio::test]
    async fn scripted_model_replays_turns_then_defaults_to_stop() {
        let model = ScriptedModel::shared();
        model.push_text_turn("first", FinishReason::ToolCalls).await;

        let request = request_for(FakeSandbox::standalone("sbx-m"));
        let (tx, mut rx) = mpsc::channel(8);
        let outcome = model.stream_turn(request.clone(), tx).await.unwrap();
        assert_eq!(outcome.finish_reason, FinishReason::ToolCalls);
        assert_eq!(outcome.new_messages[0].text(), "first");
        assert_eq!(
            rx.recv().await,
            Some(StreamChunk::Text {
                text: "first".to_string()
            })
        );

        let (tx, _rx) = mpsc::channel(8);
        let outcome = model.stream_turn(request, tx).await.unwrap();
        assert_eq!(outcome.finish_reason, FinishReason::Stop);
        assert_eq!(model.calls().await, 2);

        let seen = model.seen_requests().await;
        assert_eq!(seen[0].message_texts, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn scripted_tool_turn_runs_the_real_tool_path() {
        let model = ScriptedModel::shared();
        model.push_tool_turn("list_dir", serde_json::json!({})).await;

        let sandbox = FakeSandbox::standalone("sbx-tool");
        let (tx, mut rx) = mpsc::channel(8);
        let outcome = model
            .stream_turn(request_for(Arc::clone(&sandbox)), tx)
            .await
            .unwrap();

        assert_eq!(outcome.finish_reason, FinishReason::ToolCalls);
        match &outcome.new_messages[0].parts[0] {
            MessagePart::ToolCall {
                tool_name,
                output: Some(_),
                ..
            } => assert_eq!(tool_name, "list_dir"),
            other => panic!("expected a completed tool call, got {other:?}"),
        }
        assert!(matches!(
            rx.recv().await,
            Some(StreamChunk::ToolCallStarted { .. })
        ));
        assert_eq!(sandbox.commands().await[0].0, "ls");
    }

    #[tokio::test]
    async fn injected_model_failure_fires_once() {
        let model = ScriptedModel::shared();
        model.fail_next("boom").await;

        let (tx, _rx) = mpsc::channel(8);
        let err = model
            .stream_turn(request_for(FakeSandbox::standalone("sbx-f")), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Model(_)));

        let (tx, _rx) = mpsc::channel(8);
        assert!(model
            .stream_turn(request_for(FakeSandbox::standalone("sbx-f")), tx)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn conversations_append_in_order_and_complete_comments() {
        let conversations = MemoryConversations::shared();
        conversations
            .append_messages("t1", &[AgentMessage::user("one")])
            .await
            .unwrap();
        conversations
            .append_messages("t1", &[AgentMessage::assistant("two")])
            .await
            .unwrap();

        let messages = conversations.list_messages("t1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text(), "one");

        conversations.set_comment_stream("c1", "s1").await;
        assert_eq!(
            conversations.comment_stream("c1").await,
            Some("s1".to_string())
        );

        conversations
            .complete_comment("c1", &[AgentMessage::assistant("done")])
            .await
            .unwrap();
        assert_eq!(conversations.comment_stream("c1").await, None);
        assert_eq!(
            conversations.completed("c1").await.map(|m| m.len()),
            Some(1)
        );
    }

    #[tokio::test]
    async fn gated_lists_block_until_allowed() {
        let conversations = MemoryConversations::shared();
        conversations.gate_lists().await;

        let blocked =
            tokio::time::timeout(Duration::from_millis(20), conversations.list_messages("t1"))
                .await;
        assert!(blocked.is_err());

        conversations.allow_lists(1).await;
        let allowed =
            tokio::time::timeout(Duration::from_millis(200), conversations.list_messages("t1"))
                .await;
        assert!(allowed.is_ok());
    }

    #[tokio::test]
    async fn unknown_post_context_is_a_conversation_error() {
        let conversations = MemoryConversations::shared();
        let err = conversations
            .comment_context("ghost", "c1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conversation(_)));
    }
}
