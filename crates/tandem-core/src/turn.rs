// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! One turn: a single provider call plus the tool batch it induced.
//!
//! The executor consumes the adapter's item stream, forwards deltas to the
//! UI immediately, buffers the durable items, and appends them to the
//! session in the canonical order (reasoning, assistant, tool calls) only
//! when the stream succeeded.  Stream failure raises [`TurnError::Stream`]
//! so the task loop can decide on retry; cancellation raises
//! [`TurnError::Interrupted`] carrying the partial assistant text.

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use tandem_model::{LlmCallParameter, LlmClient};
use tandem_protocol::{
    AssistantMessageItem, ConversationItem, Event, ResponseMetadataItem, TaskMetadata,
};
use tandem_tools::{
    CancelFlag, PartialReports, SubAgentRunner, ToolContext, ToolExecutor, ToolExecutorEvent,
    UserInteraction,
};

use crate::profile::AgentProfile;
use crate::session::SessionHandle;

#[derive(Debug, Error)]
pub enum TurnError {
    /// The provider stream aborted or finished with a non-completed status.
    #[error("{0}")]
    Stream(String),
    /// The user interrupted the turn.
    #[error("interrupted")]
    Interrupted { partial_text: String },
}

#[derive(Debug, Default)]
pub struct TurnOutcome {
    pub has_tool_call: bool,
    pub metadata: Option<ResponseMetadataItem>,
    /// Metadata surfaced by sub-agent tool results during this turn.
    pub sub_agent_metadata: Vec<TaskMetadata>,
}

/// Shared callbacks and knobs a turn threads into tool execution.
#[derive(Clone, Default)]
pub struct TurnDeps {
    pub sub_agents: Option<Arc<dyn SubAgentRunner>>,
    pub user_interaction: Option<Arc<dyn UserInteraction>>,
    pub bash_timeout_secs: u64,
}

pub struct TurnExecutor {
    session: SessionHandle,
    profile: AgentProfile,
    deps: TurnDeps,
    cancel: CancelFlag,
}

impl TurnExecutor {
    pub fn new(
        session: SessionHandle,
        profile: AgentProfile,
        deps: TurnDeps,
        cancel: CancelFlag,
    ) -> Self {
        Self { session, profile, deps, cancel }
    }

    pub async fn run(&mut self, tx: &mpsc::Sender<Event>) -> Result<TurnOutcome, TurnError> {
        let session_id = self.session.id.clone();
        let _ = tx.send(Event::TurnStart { session_id: session_id.clone() }).await;

        let param = LlmCallParameter {
            input: self.session.history().await,
            system: self.profile.system_prompt.clone(),
            tools: self.profile.tools.clone(),
            session_id: Some(session_id.clone()),
            ..Default::default()
        };
        let mut stream = self.profile.llm_client.call(param).await;

        let mut reasoning_items: Vec<ConversationItem> = Vec::new();
        let mut assistant: Option<AssistantMessageItem> = None;
        let mut tool_calls: Vec<ConversationItem> = Vec::new();
        let mut tool_call_items = Vec::new();
        let mut metadata: Option<ResponseMetadataItem> = None;
        let mut failure: Option<String> = None;
        let mut partial_text = String::new();

        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    drop(stream);
                    if !partial_text.is_empty() {
                        self.session
                            .append([ConversationItem::Assistant(AssistantMessageItem::new(
                                partial_text.clone(),
                                None,
                            ))])
                            .await;
                    }
                    let _ = tx.send(Event::TurnEnd { session_id }).await;
                    return Err(TurnError::Interrupted { partial_text });
                }
                item = stream.next() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            match item {
                ConversationItem::Start(_) => {}
                ConversationItem::ReasoningText(item) => {
                    let _ = tx
                        .send(Event::Thinking {
                            session_id: session_id.clone(),
                            response_id: item.response_id.clone(),
                            content: item.content.clone(),
                        })
                        .await;
                    reasoning_items.push(ConversationItem::ReasoningText(item));
                }
                ConversationItem::ReasoningEncrypted(item) => {
                    reasoning_items.push(ConversationItem::ReasoningEncrypted(item));
                }
                ConversationItem::AssistantDelta(delta) => {
                    partial_text.push_str(&delta.content);
                    let _ = tx
                        .send(Event::AssistantMessageDelta {
                            session_id: session_id.clone(),
                            response_id: delta.response_id,
                            content: delta.content,
                        })
                        .await;
                }
                ConversationItem::Assistant(item) => {
                    let _ = tx
                        .send(Event::AssistantMessage {
                            session_id: session_id.clone(),
                            response_id: item.response_id.clone(),
                            content: item.content.clone(),
                        })
                        .await;
                    partial_text = item.content.clone();
                    if assistant.replace(item).is_some() {
                        warn!("provider emitted more than one assistant message in a turn");
                    }
                }
                ConversationItem::ToolCallStart(item) => {
                    let _ = tx
                        .send(Event::TurnToolCallStart {
                            session_id: session_id.clone(),
                            tool_call_id: item.call_id,
                            tool_name: item.name,
                        })
                        .await;
                }
                ConversationItem::ToolCall(item) => {
                    tool_call_items.push(item.clone());
                    tool_calls.push(ConversationItem::ToolCall(item));
                }
                ConversationItem::ResponseMetadata(item) => {
                    let _ = tx
                        .send(Event::ResponseMetadata {
                            session_id: session_id.clone(),
                            metadata: item.clone(),
                        })
                        .await;
                    if let Some(status) = &item.status {
                        if status != "completed" {
                            failure
                                .get_or_insert_with(|| format!("Response status: {status}"));
                        }
                    }
                    metadata = Some(item);
                }
                ConversationItem::StreamError(item) => {
                    failure = Some(item.error.clone());
                    // Kept in the log for observability; buffered turn items
                    // are dropped on failure.
                    self.session.append([ConversationItem::StreamError(item)]).await;
                }
                other => {
                    warn!(item = ?other, "unexpected item on provider stream");
                }
            }
        }

        if let Some(error) = failure {
            let _ = tx.send(Event::TurnEnd { session_id }).await;
            return Err(TurnError::Stream(error));
        }

        // Canonical order: reasoning, assistant, tool calls.
        let mut to_append = reasoning_items;
        if let Some(assistant) = assistant {
            to_append.push(ConversationItem::Assistant(assistant));
        }
        let has_tool_call = !tool_calls.is_empty();
        to_append.extend(tool_calls);
        self.session.append(to_append).await;

        let mut outcome = TurnOutcome { has_tool_call, metadata, ..Default::default() };

        if has_tool_call {
            self.run_tool_batch(tool_call_items, tx, &mut outcome, &partial_text).await?;
        }

        let _ = tx.send(Event::TurnEnd { session_id }).await;
        Ok(outcome)
    }

    async fn run_tool_batch(
        &mut self,
        calls: Vec<tandem_protocol::ToolCallItem>,
        tx: &mpsc::Sender<Event>,
        outcome: &mut TurnOutcome,
        partial_text: &str,
    ) -> Result<(), TurnError> {
        let tool_ctx = ToolContext {
            session_id: self.session.id.clone(),
            work_dir: self.session.work_dir.clone(),
            file_tracker: self.session.file_tracker.clone(),
            todos: self.session.todos.clone(),
            cancel: self.cancel.clone(),
            bash_timeout_secs: self.deps.bash_timeout_secs,
            truncation_dir: self.session.work_dir.join(".tandem").join("truncation"),
            sub_agents: self.deps.sub_agents.clone(),
            user_interaction: self.deps.user_interaction.clone(),
            partial_reports: PartialReports::new(),
        };
        let mut tool_exec = ToolExecutor::new(self.profile.registry.clone(), tool_ctx);
        let parallel = self.profile.llm_client.supports_parallel_tool_calls();
        let (etx, mut erx) = mpsc::channel::<ToolExecutorEvent>(64);

        let interrupted;
        {
            let run_fut = tool_exec.run(calls, parallel, etx);
            tokio::pin!(run_fut);
            let mut run_done = false;
            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        interrupted = true;
                        break;
                    }
                    event = erx.recv() => match event {
                        Some(event) => self.handle_tool_event(event, tx, outcome).await,
                        None => {
                            interrupted = false;
                            break;
                        }
                    },
                    _ = &mut run_fut, if !run_done => {
                        run_done = true;
                    }
                }
            }
        }

        if interrupted {
            // Drain results that raced the cancellation, then synthesize for
            // everything still in flight so every tool call in the log has a
            // matching result.
            while let Ok(event) = erx.try_recv() {
                self.handle_tool_event(event, tx, outcome).await;
            }
            for event in tool_exec.cancel_pending() {
                self.handle_tool_event(event, tx, outcome).await;
            }
            let _ = tx.send(Event::TurnEnd { session_id: self.session.id.clone() }).await;
            return Err(TurnError::Interrupted { partial_text: partial_text.to_string() });
        }
        Ok(())
    }

    async fn handle_tool_event(
        &self,
        event: ToolExecutorEvent,
        tx: &mpsc::Sender<Event>,
        outcome: &mut TurnOutcome,
    ) {
        let session_id = self.session.id.clone();
        match event {
            ToolExecutorEvent::CallStarted { call } => {
                let _ = tx
                    .send(Event::ToolCall {
                        session_id,
                        response_id: call.response_id.clone(),
                        tool_call_id: call.call_id,
                        tool_name: call.name,
                        arguments: call.arguments,
                    })
                    .await;
            }
            ToolExecutorEvent::CallFinished { call, result } => {
                if let Some(meta) = &result.task_metadata {
                    outcome.sub_agent_metadata.push(meta.clone());
                }
                let event = Event::ToolResult {
                    session_id,
                    tool_call_id: call.call_id,
                    tool_name: call.name,
                    result: result.output.clone().unwrap_or_default(),
                    ui_extra: result.ui_extra.clone(),
                    status: result.status,
                };
                self.session.append([ConversationItem::ToolResult(result)]).await;
                let _ = tx.send(event).await;
            }
            ToolExecutorEvent::TodoChanged { todos } => {
                let _ = tx.send(Event::TodoChange { session_id, todos }).await;
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tandem_model::mock::MockClient;
    use tandem_protocol::{
        AssistantMessageDelta, ReasoningTextItem, StreamErrorItem, ToolCallItem, ToolStatus,
        UserMessageItem,
    };

    use crate::profile::{DefaultModelProfileProvider, ModelProfileProvider};

    fn profile_with_script(
        work_dir: &std::path::Path,
        scripts: Vec<Vec<ConversationItem>>,
    ) -> AgentProfile {
        let client = Arc::new(MockClient::new("mock-model", scripts));
        DefaultModelProfileProvider::new(work_dir).build_profile(client, None, None)
    }

    async fn drain_events(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn plain_text_turn_appends_assistant_and_reports_no_tools() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionHandle::new(dir.path(), None);
        session.append([ConversationItem::User(UserMessageItem::new("hi"))]).await;
        let profile = profile_with_script(
            dir.path(),
            vec![vec![
                ConversationItem::AssistantDelta(AssistantMessageDelta::new("hel", None)),
                ConversationItem::AssistantDelta(AssistantMessageDelta::new("lo", None)),
                ConversationItem::Assistant(AssistantMessageItem::new("hello", None)),
            ]],
        );
        let (tx, mut rx) = mpsc::channel(64);
        let mut turn =
            TurnExecutor::new(session.clone(), profile, TurnDeps::default(), CancelFlag::inert());
        let outcome = turn.run(&tx).await.unwrap();
        assert!(!outcome.has_tool_call);
        assert!(outcome.metadata.is_some());

        let history = session.history().await;
        assert!(matches!(&history[1], ConversationItem::Assistant(a) if a.content == "hello"));

        let events = drain_events(&mut rx).await;
        assert!(matches!(events.first(), Some(Event::TurnStart { .. })));
        assert!(matches!(events.last(), Some(Event::TurnEnd { .. })));
        let delta_count = events
            .iter()
            .filter(|e| matches!(e, Event::AssistantMessageDelta { .. }))
            .count();
        assert_eq!(delta_count, 2);
    }

    #[tokio::test]
    async fn reasoning_appends_before_assistant() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionHandle::new(dir.path(), None);
        let profile = profile_with_script(
            dir.path(),
            vec![vec![
                ConversationItem::Assistant(AssistantMessageItem::new("answer", None)),
                ConversationItem::ReasoningText(ReasoningTextItem::new("think", "mock-model", None)),
            ]],
        );
        let (tx, _rx) = mpsc::channel(64);
        let mut turn =
            TurnExecutor::new(session.clone(), profile, TurnDeps::default(), CancelFlag::inert());
        turn.run(&tx).await.unwrap();
        let history = session.history().await;
        // Order is normalized even when the provider interleaved oddly.
        assert!(matches!(history[0], ConversationItem::ReasoningText(_)));
        assert!(matches!(history[1], ConversationItem::Assistant(_)));
    }

    #[tokio::test]
    async fn stream_error_fails_the_turn_and_drops_buffered_items() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionHandle::new(dir.path(), None);
        let profile = profile_with_script(
            dir.path(),
            vec![vec![
                ConversationItem::Assistant(AssistantMessageItem::new("doomed", None)),
                ConversationItem::StreamError(StreamErrorItem::new("429 rate limit")),
            ]],
        );
        let (tx, mut rx) = mpsc::channel(64);
        let mut turn =
            TurnExecutor::new(session.clone(), profile, TurnDeps::default(), CancelFlag::inert());
        let err = turn.run(&tx).await.unwrap_err();
        assert!(matches!(err, TurnError::Stream(ref msg) if msg == "429 rate limit"));

        let history = session.history().await;
        // Only the stream error is persisted; the assistant text is dropped.
        assert_eq!(history.len(), 1);
        assert!(matches!(history[0], ConversationItem::StreamError(_)));
        let events = drain_events(&mut rx).await;
        assert!(matches!(events.last(), Some(Event::TurnEnd { .. })));
    }

    #[tokio::test]
    async fn non_completed_status_fails_the_turn() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionHandle::new(dir.path(), None);
        let profile = profile_with_script(
            dir.path(),
            vec![vec![ConversationItem::ResponseMetadata(ResponseMetadataItem {
                model_name: "mock-model".into(),
                status: Some("incomplete".into()),
                ..Default::default()
            })]],
        );
        let (tx, _rx) = mpsc::channel(64);
        let mut turn =
            TurnExecutor::new(session, profile, TurnDeps::default(), CancelFlag::inert());
        let err = turn.run(&tx).await.unwrap_err();
        assert!(matches!(err, TurnError::Stream(ref msg) if msg.contains("incomplete")));
    }

    #[tokio::test]
    async fn tool_call_turn_executes_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# Title\nBody\n").unwrap();
        let session = SessionHandle::new(dir.path(), None);
        let file_path = dir.path().join("README.md");
        let profile = profile_with_script(
            dir.path(),
            vec![vec![
                ConversationItem::Assistant(AssistantMessageItem::new("reading", None)),
                ConversationItem::ToolCall(ToolCallItem::new(
                    "c1",
                    "Read",
                    json!({"file_path": file_path}).to_string(),
                    None,
                )),
            ]],
        );
        let (tx, mut rx) = mpsc::channel(64);
        let mut turn = TurnExecutor::new(
            session.clone(),
            profile,
            TurnDeps { bash_timeout_secs: 10, ..Default::default() },
            CancelFlag::inert(),
        );
        let outcome = turn.run(&tx).await.unwrap();
        assert!(outcome.has_tool_call);

        let history = session.history().await;
        let result = history
            .iter()
            .find_map(|i| match i {
                ConversationItem::ToolResult(r) => Some(r),
                _ => None,
            })
            .expect("tool result in history");
        assert_eq!(result.status, ToolStatus::Success);
        assert_eq!(result.call_id, "c1");
        assert!(result.output.as_deref().unwrap().contains("# Title"));
        // Tracker observed the read.
        assert!(session.file_tracker.lock().await.contains(&file_path));

        let events = drain_events(&mut rx).await;
        assert!(events.iter().any(|e| matches!(e, Event::ToolCall { tool_name, .. } if tool_name == "Read")));
        assert!(events.iter().any(
            |e| matches!(e, Event::ToolResult { status: ToolStatus::Success, .. })
        ));
    }

    #[tokio::test]
    async fn tool_calls_without_results_never_happen_on_cancel() {
        use tandem_tools::cancel_pair;
        let dir = tempfile::tempdir().unwrap();
        let session = SessionHandle::new(dir.path(), None);
        let profile = profile_with_script(
            dir.path(),
            vec![vec![ConversationItem::ToolCall(ToolCallItem::new(
                "c1",
                "Bash",
                json!({"command": "sleep 30"}).to_string(),
                None,
            ))]],
        );
        let (handle, flag) = cancel_pair();
        let (tx, _rx) = mpsc::channel(64);
        let mut turn = TurnExecutor::new(
            session.clone(),
            profile,
            TurnDeps { bash_timeout_secs: 120, ..Default::default() },
            flag,
        );
        let run = tokio::spawn(async move { turn.run(&tx).await });
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        handle.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), run)
            .await
            .expect("cancel resolves")
            .unwrap();
        assert!(matches!(result, Err(TurnError::Interrupted { .. })));

        let history = session.history().await;
        let calls: Vec<&str> = history
            .iter()
            .filter_map(|i| match i {
                ConversationItem::ToolCall(c) => Some(c.call_id.as_str()),
                _ => None,
            })
            .collect();
        let results: Vec<&str> = history
            .iter()
            .filter_map(|i| match i {
                ConversationItem::ToolResult(r) => Some(r.call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(calls, results, "every call has a matching result");
        let interrupted = history.iter().any(|i| {
            matches!(i, ConversationItem::ToolResult(r)
                if r.output.as_deref().map(|o| o.starts_with("Interrupted")).unwrap_or(false))
        });
        assert!(interrupted, "synthetic interrupted result present");
    }
}
