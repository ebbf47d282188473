//! The single-shot response agent.
//!
//! Fills in one placeholder comment: it assembles the post and ancestor
//! comments as context, runs the same bounded step loop as the thread agent
//! minus interrupts, and terminally writes the produced messages onto the
//! comment while clearing its stream pointer.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::agent::journal::{RunJournal, RunPhase, RunRecord};
use crate::agent::message::{AgentMessage, FinishReason};
use crate::agent::model::{ModelClient, StreamChunk, TurnRequest};
use crate::agent::output::OutputStreams;
use crate::agent::store::{CommentRecord, ConversationStore, PostSnapshot};
use crate::agent::thread_tree::CommentTree;
use crate::error::Result;
use crate::prompt;
use crate::store::KeyValueStore;
use crate::tools::get_tools_with_limit;
use crate::workspace::{GitContext, WorkspaceManager};

/// Mutable state for one response run.
struct ResponseRun {
    post: PostSnapshot,
    history: Vec<CommentRecord>,
    messages: Vec<AgentMessage>,
    /// Index separating seeded context from model-produced messages.
    produced_from: usize,
    steps: u32,
    record: RunRecord,
}

pub struct ResponseAgent {
    workspaces: Arc<WorkspaceManager>,
    conversations: Arc<dyn ConversationStore>,
    journal: RunJournal,
    output: Arc<OutputStreams>,
}

impl ResponseAgent {
    pub fn new(
        workspaces: Arc<WorkspaceManager>,
        conversations: Arc<dyn ConversationStore>,
        store: Arc<dyn KeyValueStore>,
        output: Arc<OutputStreams>,
    ) -> Self {
        Self {
            workspaces,
            conversations,
            journal: RunJournal::new(store),
            output,
        }
    }

    /// Generates the reply for `comment_id`, streaming under `stream_id`.
    pub async fn run(
        &self,
        comment_id: &str,
        stream_id: &str,
        post_id: &str,
        git_context: &GitContext,
        model: &dyn ModelClient,
    ) -> Result<FinishReason> {
        let record = RunRecord::started(comment_id);
        self.journal.record(&record).await?;

        let context = self
            .conversations
            .comment_context(post_id, comment_id)
            .await?;
        let tree = CommentTree::build(context.comments);
        let mut ancestors: Vec<CommentRecord> =
            tree.ancestor_chain(comment_id).into_iter().cloned().collect();

        // The newest ancestor is the comment being replied to; a reply with
        // no ancestors was triggered by the post itself.
        let trigger_body = match ancestors.pop() {
            Some(trigger) => trigger.body,
            None => context.post.body.clone(),
        };

        let messages = vec![AgentMessage::user(trigger_body)];
        let mut run = ResponseRun {
            post: context.post,
            history: ancestors,
            produced_from: messages.len(),
            messages,
            steps: 0,
            record,
        };

        let mut sandbox_hint = None;
        let looped = self
            .drive(git_context, stream_id, model, &mut run, &mut sandbox_hint)
            .await;

        self.output.close(stream_id).await;
        let produced = run.messages.split_off(run.produced_from);

        match looped {
            Ok(finish) => {
                self.conversations
                    .complete_comment(comment_id, &produced)
                    .await?;
                self.journal
                    .record(&run.record.advanced(RunPhase::Done, run.steps))
                    .await?;
                info!(
                    comment_id,
                    steps = run.steps,
                    messages = produced.len(),
                    "completed response"
                );
                Ok(finish)
            }
            Err(e) => {
                // Clear the pointer anyway so clients stop waiting; keep
                // whatever already streamed.
                if let Err(complete_err) = self
                    .conversations
                    .complete_comment(comment_id, &produced)
                    .await
                {
                    warn!(
                        comment_id,
                        "failed to clear the comment stream pointer: {complete_err}"
                    );
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        git_context: &GitContext,
        stream_id: &str,
        model: &dyn ModelClient,
        run: &mut ResponseRun,
        sandbox_hint: &mut Option<String>,
    ) -> Result<FinishReason> {
        let settings = self.workspaces.settings();
        let max_steps = settings.max_steps;
        let tool_output_limit = settings.tool_output_limit;
        let mut finish = FinishReason::ToolCalls;

        for step in 0..max_steps {
            let workspace = self
                .workspaces
                .get_workspace(sandbox_hint.as_deref(), git_context)
                .await?;
            *sandbox_hint = Some(workspace.sandbox.sandbox_id().to_string());

            let system_prompt =
                prompt::response_system_prompt(git_context, &workspace, &run.post, &run.history);
            let tools = get_tools_with_limit(&workspace, tool_output_limit);

            let (tx, mut rx) = mpsc::channel::<StreamChunk>(100);
            let output = Arc::clone(&self.output);
            let namespace = stream_id.to_string();
            let forwarder = tokio::spawn(async move {
                while let Some(chunk) = rx.recv().await {
                    output.publish(&namespace, chunk).await;
                }
            });

            let turn = model
                .stream_turn(
                    TurnRequest {
                        system_prompt,
                        messages: run.messages.clone(),
                        tools,
                    },
                    tx,
                )
                .await;
            let _ = forwarder.await;
            let turn = turn?;

            run.messages.extend(turn.new_messages);
            run.steps = step + 1;
            self.journal
                .record(&run.record.advanced(RunPhase::Stepping, run.steps))
                .await?;

            finish = turn.finish_reason;
            if finish == FinishReason::Stop {
                break;
            }
        }

        Ok(finish)
    }
}
