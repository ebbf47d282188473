//! The long-lived thread agent.
//!
//! One agent serves one discussion thread: it registers a hook for the
//! thread token, then turns every inbound user message into a bounded step
//! loop against the model. All cross-step state lives in the external
//! stores, so a step may execute in a different process than its
//! predecessor without noticing.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::agent::hooks::{ThreadEvent, ThreadHooks};
use crate::agent::journal::{RunJournal, RunPhase, RunRecord};
use crate::agent::message::{AgentMessage, FinishReason};
use crate::agent::model::{ModelClient, StreamChunk, TurnRequest};
use crate::agent::output::OutputStreams;
use crate::agent::store::ConversationStore;
use crate::agent::streams::{InterruptRegistry, StreamRegistry};
use crate::error::Result;
use crate::prompt;
use crate::store::KeyValueStore;
use crate::tools::get_tools_with_limit;
use crate::workspace::{GitContext, WorkspaceManager};

/// Synthetic assistant note persisted when a run is cancelled mid-stream.
pub const INTERRUPTED_NOTE: &str = "[interrupted by user]";

/// What processing one inbound event produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventOutcome {
    pub finish: FinishReason,
    pub steps: u32,
}

/// Mutable state for one event's run.
struct EventState {
    namespace: String,
    record: RunRecord,
    steps: u32,
}

pub struct ThreadAgent {
    workspaces: Arc<WorkspaceManager>,
    conversations: Arc<dyn ConversationStore>,
    streams: StreamRegistry,
    interrupts: InterruptRegistry,
    journal: RunJournal,
    output: Arc<OutputStreams>,
}

impl ThreadAgent {
    pub fn new(
        workspaces: Arc<WorkspaceManager>,
        conversations: Arc<dyn ConversationStore>,
        store: Arc<dyn KeyValueStore>,
        output: Arc<OutputStreams>,
    ) -> Self {
        Self {
            workspaces,
            conversations,
            streams: StreamRegistry::new(Arc::clone(&store)),
            interrupts: InterruptRegistry::new(Arc::clone(&store)),
            journal: RunJournal::new(store),
            output,
        }
    }

    /// The output-stream namespace for an event, derived from its timestamp
    /// so reconnecting clients can re-subscribe to the same stream.
    pub fn stream_namespace(thread_id: &str, event: &ThreadEvent) -> String {
        format!("{thread_id}:{}", event.sent_at.timestamp_millis())
    }

    /// Serves a thread: processes `initial_event`, then every event resumed
    /// through the hook, until the hook closes or an event fails.
    pub async fn run(
        &self,
        hooks: &ThreadHooks,
        git_context: &GitContext,
        thread_id: &str,
        initial_event: ThreadEvent,
        model: &dyn ModelClient,
    ) -> Result<()> {
        let mut events = hooks.create(thread_id).await;
        let result = self
            .serve(&mut events, git_context, thread_id, initial_event, model)
            .await;
        hooks.close(thread_id).await;
        result
    }

    async fn serve(
        &self,
        events: &mut mpsc::UnboundedReceiver<ThreadEvent>,
        git_context: &GitContext,
        thread_id: &str,
        initial_event: ThreadEvent,
        model: &dyn ModelClient,
    ) -> Result<()> {
        let mut sandbox_hint = None;

        let outcome = self
            .process_event(git_context, thread_id, &initial_event, model, &mut sandbox_hint)
            .await?;
        info!(
            thread_id,
            finish = ?outcome.finish,
            steps = outcome.steps,
            "processed initial event"
        );

        while let Some(event) = events.recv().await {
            let outcome = self
                .process_event(git_context, thread_id, &event, model, &mut sandbox_hint)
                .await?;
            info!(
                thread_id,
                finish = ?outcome.finish,
                steps = outcome.steps,
                "processed event"
            );
        }
        Ok(())
    }

    /// Runs the bounded step loop for one inbound event.
    pub(crate) async fn process_event(
        &self,
        git_context: &GitContext,
        thread_id: &str,
        event: &ThreadEvent,
        model: &dyn ModelClient,
        sandbox_hint: &mut Option<String>,
    ) -> Result<EventOutcome> {
        // An interrupt newer than the event wins before anything streams.
        if self
            .interrupts
            .interrupted_since(thread_id, event.sent_at)
            .await?
        {
            debug!(thread_id, "interrupt marker predates the event, skipping");
            let record = RunRecord::started(thread_id).advanced(RunPhase::Interrupted, 0);
            self.journal.record(&record).await?;
            return Ok(EventOutcome {
                finish: FinishReason::InterruptedBeforeStream,
                steps: 0,
            });
        }

        let mut state = EventState {
            namespace: Self::stream_namespace(thread_id, event),
            record: RunRecord::started(thread_id),
            steps: 0,
        };
        self.streams
            .set_stream_id(thread_id, &state.namespace)
            .await?;
        self.journal.record(&state.record).await?;

        let looped = self
            .step_loop(git_context, event, model, sandbox_hint, &mut state)
            .await;

        let closed = self.close_event(&looped, &state).await;
        let finish = looped?;
        closed?;
        Ok(EventOutcome {
            finish,
            steps: state.steps,
        })
    }

    async fn step_loop(
        &self,
        git_context: &GitContext,
        event: &ThreadEvent,
        model: &dyn ModelClient,
        sandbox_hint: &mut Option<String>,
        state: &mut EventState,
    ) -> Result<FinishReason> {
        let thread_id = state.record.thread_id.clone();
        let settings = self.workspaces.settings();
        let max_steps = settings.max_steps;
        let tool_output_limit = settings.tool_output_limit;
        let mut finish = FinishReason::ToolCalls;

        for step in 0..max_steps {
            let messages = self.conversations.list_messages(&thread_id).await?;

            // Cooperative cancellation at the step boundary. A marker set
            // while the model call is in flight is observed here, one step
            // late.
            if self
                .interrupts
                .interrupted_since(&thread_id, event.sent_at)
                .await?
            {
                return Ok(if step == 0 {
                    FinishReason::InterruptedBeforeStream
                } else {
                    FinishReason::InterruptedMidStream
                });
            }

            let workspace = self
                .workspaces
                .get_workspace(sandbox_hint.as_deref(), git_context)
                .await?;
            *sandbox_hint = Some(workspace.sandbox.sandbox_id().to_string());

            let system_prompt = prompt::thread_system_prompt(git_context, &workspace);
            let tools = get_tools_with_limit(&workspace, tool_output_limit);

            let (tx, mut rx) = mpsc::channel::<StreamChunk>(100);
            let output = Arc::clone(&self.output);
            let namespace = state.namespace.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(chunk) = rx.recv().await {
                    output.publish(&namespace, chunk).await;
                }
            });

            let turn = model
                .stream_turn(
                    TurnRequest {
                        system_prompt,
                        messages,
                        tools,
                    },
                    tx,
                )
                .await;
            let _ = forwarder.await;
            let turn = turn?;

            if !turn.new_messages.is_empty() {
                self.conversations
                    .append_messages(&thread_id, &turn.new_messages)
                    .await?;
            }

            state.steps = step + 1;
            self.journal
                .record(&state.record.advanced(RunPhase::Stepping, state.steps))
                .await?;

            finish = turn.finish_reason;
            if finish.is_terminal() {
                break;
            }
        }

        Ok(finish)
    }

    /// Tear-down that must run however the loop exited: close the output
    /// stream, persist the interruption note, clear our stream id marker.
    async fn close_event(
        &self,
        looped: &Result<FinishReason>,
        state: &EventState,
    ) -> Result<()> {
        let thread_id = state.record.thread_id.as_str();
        self.output.close(&state.namespace).await;

        let mut deferred: Result<()> = Ok(());
        if matches!(looped, Ok(FinishReason::InterruptedMidStream)) {
            let note = AgentMessage::assistant(INTERRUPTED_NOTE);
            if let Err(e) = self.conversations.append_messages(thread_id, &[note]).await {
                warn!(thread_id, "failed to persist the interruption note: {e}");
                deferred = Err(e);
            }
        }

        match self
            .streams
            .clear_stream_id_if(thread_id, &state.namespace)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(thread_id, "stream id was superseded before close"),
            Err(e) => {
                warn!(thread_id, "failed to clear the stream id: {e}");
                if deferred.is_ok() {
                    deferred = Err(e);
                }
            }
        }

        match looped {
            Ok(finish) => {
                let phase = match finish {
                    FinishReason::InterruptedBeforeStream | FinishReason::InterruptedMidStream => {
                        RunPhase::Interrupted
                    }
                    _ => RunPhase::Done,
                };
                if let Err(e) = self
                    .journal
                    .record(&state.record.advanced(phase, state.steps))
                    .await
                {
                    warn!(thread_id, "failed to journal the run close: {e}");
                    if deferred.is_ok() {
                        deferred = Err(e);
                    }
                }
            }
            // A failed loop keeps its last journal row as the death marker.
            Err(_) => {}
        }

        deferred
    }
}
