// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The task loop: turns until the model stops calling tools.
//!
//! Owns retry-with-backoff for failed turns, the per-task metadata
//! accumulator, the reminder pass ahead of each turn, and the interrupt
//! bookkeeping that turns a cancellation into a clean partial result.

use std::collections::HashSet;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::debug;

use tandem_protocol::{
    ConversationItem, Event, InterruptItem, ResponseMetadataItem, TaskMetadata, TaskMetadataItem,
    Usage, UserInputPayload, UserMessageItem,
};
use tandem_tools::CancelFlag;

use crate::consts::{retry_delay_seconds, MAX_FAILED_TURN_RETRIES};
use crate::profile::{AgentProfile, ReportBackTool};
use crate::reminders::{run_reminders, ReminderContext};
use crate::session::SessionHandle;
use crate::turn::{TurnDeps, TurnError, TurnExecutor};

/// Accumulates response metadata across the turns of one task.
///
/// First-token latency keeps the best (minimum) turn; throughput is
/// averaged weighted by each turn's output tokens.
pub struct MetadataAccumulator {
    main: TaskMetadata,
    sub_agent_metadata: Vec<TaskMetadata>,
    throughput_weighted_sum: f64,
    throughput_tracked_tokens: u64,
}

impl MetadataAccumulator {
    pub fn new(model_name: &str) -> Self {
        Self {
            main: TaskMetadata::for_model(model_name),
            sub_agent_metadata: Vec::new(),
            throughput_weighted_sum: 0.0,
            throughput_tracked_tokens: 0,
        }
    }

    pub fn add(&mut self, turn_metadata: &ResponseMetadataItem) {
        if let Some(usage) = &turn_metadata.usage {
            let acc = self.main.usage.get_or_insert_with(Usage::default);
            acc.accumulate(usage);

            if let Some(latency) = usage.first_token_latency_ms {
                acc.first_token_latency_ms = Some(match acc.first_token_latency_ms {
                    Some(best) => best.min(latency),
                    None => latency,
                });
            }
            if let Some(tps) = usage.throughput_tps {
                if usage.output_tokens > 0 {
                    self.throughput_weighted_sum += tps * usage.output_tokens as f64;
                    self.throughput_tracked_tokens += usage.output_tokens;
                }
            }
        }
        if let Some(provider) = &turn_metadata.provider {
            self.main.provider = Some(provider.clone());
        }
        if !turn_metadata.model_name.is_empty() {
            self.main.model_name = turn_metadata.model_name.clone();
        }
    }

    pub fn add_sub_agent_metadata(&mut self, metadata: TaskMetadata) {
        self.sub_agent_metadata.push(metadata);
    }

    pub fn finalize(mut self, task_duration_s: f64) -> TaskMetadataItem {
        if let Some(usage) = self.main.usage.as_mut() {
            usage.throughput_tps = if self.throughput_tracked_tokens > 0 {
                Some(self.throughput_weighted_sum / self.throughput_tracked_tokens as f64)
            } else {
                None
            };
        }
        self.main.task_duration_s = Some(task_duration_s);
        TaskMetadataItem {
            main: self.main,
            sub_agent_task_metadata: self.sub_agent_metadata,
            created_at: chrono::Utc::now(),
        }
    }
}

pub struct TaskExecutor {
    session: SessionHandle,
    profile: AgentProfile,
    deps: TurnDeps,
    cancel: CancelFlag,
}

impl TaskExecutor {
    pub fn new(
        session: SessionHandle,
        profile: AgentProfile,
        deps: TurnDeps,
        cancel: CancelFlag,
    ) -> Self {
        Self { session, profile, deps, cancel }
    }

    pub async fn run(&mut self, input: UserInputPayload, tx: mpsc::Sender<Event>) {
        let session_id = self.session.id.clone();
        let started_at = Instant::now();

        let _ = tx
            .send(Event::TaskStart {
                session_id: session_id.clone(),
                sub_agent_state: self.session.sub_agent_state().await,
            })
            .await;
        self.session
            .append([ConversationItem::User(UserMessageItem {
                content: input.text,
                images: input.images,
                created_at: chrono::Utc::now(),
            })])
            .await;

        let mut accumulator = MetadataAccumulator::new(self.profile.llm_client.model_name());
        let mut fired_reminders: HashSet<&'static str> = HashSet::new();
        let mut is_first_turn = true;

        loop {
            if self.cancel.is_cancelled() {
                self.finish_interrupted(&tx, String::new()).await;
                return;
            }

            self.reminder_pass(&tx, is_first_turn, &mut fired_reminders).await;
            is_first_turn = false;

            // Retry loop: a fresh turn object each attempt, same history.
            let mut attempt = 0u32;
            let outcome = loop {
                let mut turn = TurnExecutor::new(
                    self.session.clone(),
                    self.profile.clone(),
                    self.deps.clone(),
                    self.cancel.clone(),
                );
                match turn.run(&tx).await {
                    Ok(outcome) => break outcome,
                    Err(TurnError::Interrupted { partial_text }) => {
                        self.finish_interrupted(&tx, partial_text).await;
                        return;
                    }
                    Err(TurnError::Stream(message)) => {
                        attempt += 1;
                        if attempt > MAX_FAILED_TURN_RETRIES {
                            debug!("maximum consecutive failed turns reached, aborting task");
                            let _ = tx
                                .send(Event::Error {
                                    message: format!(
                                        "{message}\nTurn failed after {MAX_FAILED_TURN_RETRIES} retries."
                                    ),
                                    can_retry: false,
                                })
                                .await;
                            return;
                        }
                        let delay = retry_delay_seconds(attempt);
                        let _ = tx
                            .send(Event::Error {
                                message: format!(
                                    "Retrying {attempt}/{MAX_FAILED_TURN_RETRIES} in {delay:.1}s - {message}"
                                ),
                                can_retry: true,
                            })
                            .await;
                        tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => {
                                self.finish_interrupted(&tx, String::new()).await;
                                return;
                            }
                            _ = tokio::time::sleep(std::time::Duration::from_secs_f64(delay)) => {}
                        }
                    }
                }
            };

            if let Some(metadata) = &outcome.metadata {
                accumulator.add(metadata);
            }
            for sub_metadata in outcome.sub_agent_metadata {
                accumulator.add_sub_agent_metadata(sub_metadata);
            }
            self.session.todos.lock().await.turns_since_update += 1;

            if !outcome.has_tool_call {
                break;
            }
        }

        let aggregated = accumulator.finalize(started_at.elapsed().as_secs_f64());
        let _ = tx
            .send(Event::TaskMetadata {
                session_id: session_id.clone(),
                metadata: aggregated.clone(),
            })
            .await;
        self.session.append([ConversationItem::TaskMetadata(aggregated)]).await;

        let (task_result, has_structured_output) = self.task_result().await;
        let _ = tx
            .send(Event::TaskFinish { session_id, task_result, has_structured_output })
            .await;
    }

    async fn reminder_pass(
        &self,
        tx: &mpsc::Sender<Event>,
        is_first_turn: bool,
        fired: &mut HashSet<&'static str>,
    ) {
        if self.profile.reminders.is_empty() {
            return;
        }
        let ctx = {
            let todos = self.session.todos.lock().await;
            let tracker = self.session.file_tracker.lock().await;
            ReminderContext {
                todos: todos.todos.clone(),
                turns_since_todo_update: todos.turns_since_update,
                changed_files: tracker.changed_paths(),
                is_first_turn,
            }
        };
        for item in run_reminders(&self.profile.reminders, &ctx, fired) {
            self.session.append([ConversationItem::Developer(item.clone())]).await;
            let _ = tx
                .send(Event::DeveloperMessage {
                    session_id: self.session.id.clone(),
                    item,
                })
                .await;
        }
    }

    async fn finish_interrupted(&self, tx: &mpsc::Sender<Event>, partial_text: String) {
        self.session.append([ConversationItem::Interrupt(InterruptItem::new())]).await;
        let _ = tx.send(Event::Interrupt { session_id: self.session.id.clone() }).await;
        let _ = tx
            .send(Event::TaskFinish {
                session_id: self.session.id.clone(),
                task_result: partial_text,
                has_structured_output: false,
            })
            .await;
    }

    /// The final answer: the last `report_back` payload for structured
    /// output profiles, otherwise the last assistant message.
    async fn task_result(&self) -> (String, bool) {
        if self.profile.structured_output {
            let history = self.session.history().await;
            let payload = history.iter().rev().find_map(|item| match item {
                ConversationItem::ToolCall(call) if call.name == ReportBackTool::NAME => {
                    Some(call.arguments.clone())
                }
                _ => None,
            });
            if let Some(payload) = payload {
                return (payload, true);
            }
        }
        (
            self.session.last_assistant_message().await.unwrap_or_default(),
            false,
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tandem_model::mock::MockClient;
    use tandem_protocol::{AssistantMessageItem, ToolCallItem};

    use crate::profile::{DefaultModelProfileProvider, ModelProfileProvider};

    fn make_task(
        work_dir: &std::path::Path,
        scripts: Vec<Vec<ConversationItem>>,
    ) -> (TaskExecutor, SessionHandle, Arc<MockClient>) {
        let client = Arc::new(MockClient::new("mock-model", scripts));
        let profile = DefaultModelProfileProvider::new(work_dir)
            .build_profile(client.clone(), None, None);
        let session = SessionHandle::new(work_dir, None);
        let task = TaskExecutor::new(
            session.clone(),
            profile,
            TurnDeps { bash_timeout_secs: 10, ..Default::default() },
            CancelFlag::inert(),
        );
        (task, session, client)
    }

    async fn collect_events(mut rx: mpsc::Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn metadata_with_usage(input: u64, output: u64) -> ResponseMetadataItem {
        ResponseMetadataItem {
            model_name: "mock-model".into(),
            usage: Some(Usage { input_tokens: input, output_tokens: output, ..Default::default() }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn text_only_task_finishes_after_one_turn() {
        let dir = tempfile::tempdir().unwrap();
        let (mut task, session, client) = make_task(
            dir.path(),
            vec![vec![ConversationItem::Assistant(AssistantMessageItem::new("all done", None))]],
        );
        let (tx, rx) = mpsc::channel(256);
        task.run(UserInputPayload::text("do the thing"), tx).await;
        assert_eq!(client.calls_made(), 1);

        let events = collect_events(rx).await;
        assert!(matches!(events.first(), Some(Event::TaskStart { .. })));
        match events.last() {
            Some(Event::TaskFinish { task_result, .. }) => assert_eq!(task_result, "all done"),
            other => panic!("expected TaskFinish, got {other:?}"),
        }
        assert!(events.iter().any(|e| matches!(e, Event::TaskMetadata { .. })));

        // History ends with the aggregated task metadata.
        let history = session.history().await;
        assert!(matches!(history.last(), Some(ConversationItem::TaskMetadata(_))));
    }

    #[tokio::test]
    async fn tool_call_turn_loops_until_text_only_turn() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "content\n").unwrap();
        let file = dir.path().join("f.txt");
        let (mut task, _session, client) = make_task(
            dir.path(),
            vec![
                vec![ConversationItem::ToolCall(ToolCallItem::new(
                    "c1",
                    "Read",
                    json!({"file_path": file}).to_string(),
                    None,
                ))],
                vec![ConversationItem::Assistant(AssistantMessageItem::new(
                    "the file says: content",
                    None,
                ))],
            ],
        );
        let (tx, rx) = mpsc::channel(256);
        task.run(UserInputPayload::text("read f.txt"), tx).await;
        assert_eq!(client.calls_made(), 2, "turn loop ran twice");
        let events = collect_events(rx).await;
        let turn_starts = events.iter().filter(|e| matches!(e, Event::TurnStart { .. })).count();
        let turn_ends = events.iter().filter(|e| matches!(e, Event::TurnEnd { .. })).count();
        assert_eq!(turn_starts, 2);
        assert_eq!(turn_ends, 2, "turn start/end strictly balanced");
    }

    #[tokio::test]
    async fn empty_turn_finishes_with_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let (mut task, _session, _client) = make_task(dir.path(), vec![vec![]]);
        let (tx, rx) = mpsc::channel(256);
        task.run(UserInputPayload::text("hello?"), tx).await;
        let events = collect_events(rx).await;
        match events.last() {
            Some(Event::TaskFinish { task_result, .. }) => assert_eq!(task_result, ""),
            other => panic!("expected TaskFinish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_turn_emits_empty_todo_reminder() {
        let dir = tempfile::tempdir().unwrap();
        let (mut task, session, _client) = make_task(
            dir.path(),
            vec![vec![ConversationItem::Assistant(AssistantMessageItem::new("hi", None))]],
        );
        let (tx, rx) = mpsc::channel(256);
        task.run(UserInputPayload::text("hello"), tx).await;
        let events = collect_events(rx).await;
        assert!(events.iter().any(|e| matches!(
            e,
            Event::DeveloperMessage { item, .. } if item.reminder.as_deref() == Some("empty_todo")
        )));
        // The reminder is part of the model-visible history.
        let history = session.history().await;
        assert!(history.iter().any(|i| matches!(i, ConversationItem::Developer(_))));
    }

    #[tokio::test]
    async fn failed_turn_retries_and_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let (mut task, session, client) = make_task(
            dir.path(),
            vec![
                vec![ConversationItem::StreamError(tandem_protocol::StreamErrorItem::new(
                    "429 rate limit",
                ))],
                vec![ConversationItem::Assistant(AssistantMessageItem::new("recovered", None))],
            ],
        );
        let (tx, rx) = mpsc::channel(256);
        task.run(UserInputPayload::text("try"), tx).await;
        assert_eq!(client.calls_made(), 2);
        let events = collect_events(rx).await;
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Error { message, can_retry: true }
                if message.contains("Retrying 1/3") && message.contains("429 rate limit")
        )));
        match events.last() {
            Some(Event::TaskFinish { task_result, .. }) => assert_eq!(task_result, "recovered"),
            other => panic!("expected TaskFinish, got {other:?}"),
        }
        // The failed turn left no assistant content, only the stream error.
        let history = session.history().await;
        let assistants = history
            .iter()
            .filter(|i| matches!(i, ConversationItem::Assistant(_)))
            .count();
        assert_eq!(assistants, 1);
    }

    #[tokio::test]
    async fn accumulator_merges_usage_and_tracks_minimum_latency() {
        let mut acc = MetadataAccumulator::new("m");
        let mut first = metadata_with_usage(100, 10);
        first.usage.as_mut().unwrap().first_token_latency_ms = Some(500.0);
        let mut second = metadata_with_usage(50, 20);
        second.usage.as_mut().unwrap().first_token_latency_ms = Some(200.0);
        acc.add(&first);
        acc.add(&second);
        let item = acc.finalize(1.5);
        let usage = item.main.usage.unwrap();
        assert_eq!(usage.input_tokens, 150);
        assert_eq!(usage.output_tokens, 30);
        assert_eq!(usage.first_token_latency_ms, Some(200.0));
        assert_eq!(item.main.task_duration_s, Some(1.5));
    }

    #[tokio::test]
    async fn accumulator_weights_throughput_by_output_tokens() {
        let mut acc = MetadataAccumulator::new("m");
        let mut fast = metadata_with_usage(0, 100);
        fast.usage.as_mut().unwrap().throughput_tps = Some(50.0);
        let mut slow = metadata_with_usage(0, 300);
        slow.usage.as_mut().unwrap().throughput_tps = Some(10.0);
        acc.add(&fast);
        acc.add(&slow);
        let item = acc.finalize(1.0);
        // (50*100 + 10*300) / 400 = 20
        assert_eq!(item.main.usage.unwrap().throughput_tps, Some(20.0));
    }
}
