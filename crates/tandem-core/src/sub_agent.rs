// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Nested agent execution for the `Task`/`Oracle`/`Explore`/`WebFetchAgent`
//! tools.
//!
//! The child runs as its own session with a restricted profile, proxying
//! every event onto the parent's bus.  The orchestration runs in a spawned
//! task guarded by a cancel-on-drop handle: if the calling tool future is
//! torn down by a parent interrupt, the child still winds down cleanly and
//! emits its partial `TaskFinish` before exiting.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tandem_model::LlmClient;
use tandem_protocol::{
    Event, SubAgentResult, SubAgentState, TaskMetadata, UserInputPayload,
};
use tandem_tools::{
    cancel_pair, CancelHandle, PartialReport, PartialReports, SubAgentRunner,
};

use crate::profile::ModelProfileProvider;
use crate::session::SessionHandle;
use crate::task::TaskExecutor;
use crate::turn::TurnDeps;

const PROGRESS_ARGS_MAX_LEN: usize = 500;

/// Builds the LLM client for a sub-agent type.  The production factory
/// resolves the configured model; tests substitute a mock.
pub type ClientFactory =
    Arc<dyn Fn(&str) -> anyhow::Result<Arc<dyn LlmClient>> + Send + Sync>;

struct CancelOnDrop(Option<CancelHandle>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.cancel();
        }
    }
}

#[derive(Default)]
struct ProgressLog {
    /// call_id → (tool_name, arguments), in invocation order.
    entries: Vec<(String, String, String)>,
    completed: HashSet<String>,
}

impl ProgressLog {
    fn render(&self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .entries
            .iter()
            .map(|(call_id, name, arguments)| {
                let status =
                    if self.completed.contains(call_id) { "completed" } else { "interrupted" };
                let args_display = if arguments.chars().count() > PROGRESS_ARGS_MAX_LEN {
                    let cut: String = arguments.chars().take(PROGRESS_ARGS_MAX_LEN).collect();
                    format!("{cut}...")
                } else {
                    arguments.clone()
                };
                format!("- {name}({args_display}) [{status}]")
            })
            .collect();
        Some(lines.join("\n"))
    }
}

fn append_agent_id(task_result: &str, session_id: &str) -> String {
    let trimmed = task_result.trim_end();
    let footer =
        format!("agentId: {session_id} (for resuming to continue this agent's work if needed)");
    if trimmed.trim().is_empty() {
        footer
    } else {
        format!("{trimmed}\n\n{footer}")
    }
}

pub struct SubAgentManager {
    event_tx: mpsc::Sender<Event>,
    client_factory: ClientFactory,
    profile_provider: Arc<dyn ModelProfileProvider>,
    work_dir: PathBuf,
    sessions_dir: Option<PathBuf>,
    bash_timeout_secs: u64,
}

impl SubAgentManager {
    pub fn new(
        event_tx: mpsc::Sender<Event>,
        client_factory: ClientFactory,
        profile_provider: Arc<dyn ModelProfileProvider>,
        work_dir: PathBuf,
        sessions_dir: Option<PathBuf>,
        bash_timeout_secs: u64,
    ) -> Self {
        Self {
            event_tx,
            client_factory,
            profile_provider,
            work_dir,
            sessions_dir,
            bash_timeout_secs,
        }
    }

    async fn child_session(&self, state: &SubAgentState) -> Result<SessionHandle, SubAgentResult> {
        match &state.resume {
            Some(resume_id) => {
                let Some(sessions_dir) = &self.sessions_dir else {
                    return Err(SubAgentResult::failure(format!(
                        "Failed to resume sub-agent session '{resume_id}': session storage is disabled"
                    )));
                };
                let session = SessionHandle::load(resume_id, sessions_dir).map_err(|e| {
                    SubAgentResult::failure(format!(
                        "Failed to resume sub-agent session '{resume_id}': {e}"
                    ))
                })?;
                let Some(existing_state) = session.sub_agent_state().await else {
                    return Err(SubAgentResult::failure(format!(
                        "Invalid resume id '{resume_id}': target session is not a sub-agent session"
                    )));
                };
                if existing_state.sub_agent_type != state.sub_agent_type {
                    return Err(SubAgentResult::failure(format!(
                        "Invalid resume id: sub-agent type mismatch. Expected '{}', got '{}'.",
                        state.sub_agent_type, existing_state.sub_agent_type
                    )));
                }
                session.set_sub_agent_state(state.clone()).await;
                Ok(session)
            }
            None => {
                let session = SessionHandle::new(&self.work_dir, self.sessions_dir.as_deref());
                session.set_sub_agent_state(state.clone()).await;
                Ok(session)
            }
        }
    }
}

#[async_trait]
impl SubAgentRunner for SubAgentManager {
    async fn run(
        &self,
        state: SubAgentState,
        call_id: &str,
        reports: &PartialReports,
    ) -> SubAgentResult {
        let child_session = match self.child_session(&state).await {
            Ok(session) => session,
            Err(failure) => return failure,
        };
        let client = match (self.client_factory)(&state.sub_agent_type) {
            Ok(client) => client,
            Err(e) => {
                return SubAgentResult::failure(format!(
                    "Failed to build client for sub-agent '{}': {e}",
                    state.sub_agent_type
                ))
            }
        };
        let profile = self.profile_provider.build_profile(
            client,
            Some(&state.sub_agent_type),
            state.output_schema.clone(),
        );

        debug!(
            sub_agent = %state.sub_agent_type,
            session_id = %child_session.id,
            "running sub-agent"
        );

        // Shared state the parent can read after cancelling this tool call.
        let progress: Arc<StdMutex<ProgressLog>> = Arc::default();
        let metadata_slot: Arc<StdMutex<Option<TaskMetadata>>> = Arc::default();
        {
            let progress = progress.clone();
            let metadata_slot = metadata_slot.clone();
            reports.register(
                call_id,
                PartialReport {
                    progress: Some(Box::new(move || progress.lock().unwrap().render())),
                    metadata: Some(Box::new(move || metadata_slot.lock().unwrap().clone())),
                },
            );
        }

        let (child_handle, child_flag) = cancel_pair();
        let guard = CancelOnDrop(Some(child_handle));

        let parent_tx = self.event_tx.clone();
        let session = child_session.clone();
        let sub_type = state.sub_agent_type.clone();
        let sub_desc = state.sub_agent_desc.clone();
        let prompt = state.sub_agent_prompt.clone();
        let bash_timeout_secs = self.bash_timeout_secs;
        let progress_for_task = progress.clone();
        let metadata_for_task = metadata_slot.clone();

        // Detached so a dropped tool future cannot strand the child
        // mid-turn; the guard's cancel drives it to a prompt finish.
        let orchestration = tokio::spawn(async move {
            let (child_tx, mut child_rx) = mpsc::channel::<Event>(256);
            let mut task = TaskExecutor::new(
                session.clone(),
                profile,
                TurnDeps { sub_agents: None, user_interaction: None, bash_timeout_secs },
                child_flag,
            );
            let driver = tokio::spawn(async move {
                task.run(UserInputPayload::text(prompt), child_tx).await;
            });

            let mut task_result = String::new();
            let mut finished = false;
            let mut failure_message: Option<String> = None;

            while let Some(event) = child_rx.recv().await {
                // Track tool activity for the partial-progress report.
                match &event {
                    Event::ToolCall { tool_call_id, tool_name, arguments, .. } => {
                        progress_for_task.lock().unwrap().entries.push((
                            tool_call_id.clone(),
                            tool_name.clone(),
                            arguments.clone(),
                        ));
                    }
                    Event::ToolResult { tool_call_id, .. } => {
                        progress_for_task
                            .lock()
                            .unwrap()
                            .completed
                            .insert(tool_call_id.clone());
                    }
                    // Per-turn usage keeps the slot current so a cancelled
                    // child still reports the tokens it burned.
                    Event::ResponseMetadata { metadata, .. } => {
                        let mut slot = metadata_for_task.lock().unwrap();
                        let entry = slot.get_or_insert_with(|| TaskMetadata {
                            model_name: metadata.model_name.clone(),
                            sub_agent_name: Some(sub_type.clone()),
                            description: if sub_desc.is_empty() {
                                None
                            } else {
                                Some(sub_desc.clone())
                            },
                            ..Default::default()
                        });
                        if let Some(usage) = &metadata.usage {
                            entry
                                .usage
                                .get_or_insert_with(Default::default)
                                .accumulate(usage);
                        }
                    }
                    Event::TaskMetadata { metadata, .. } => {
                        let mut main = metadata.main.clone();
                        main.sub_agent_name = Some(sub_type.clone());
                        main.description =
                            if sub_desc.is_empty() { None } else { Some(sub_desc.clone()) };
                        *metadata_for_task.lock().unwrap() = Some(main);
                    }
                    Event::Error { message, can_retry: false } => {
                        failure_message = Some(message.clone());
                    }
                    _ => {}
                }
                let event = match event {
                    Event::TaskFinish { session_id, task_result: result, has_structured_output } => {
                        finished = true;
                        task_result = append_agent_id(&result, &session.id);
                        Event::TaskFinish {
                            session_id,
                            task_result: task_result.clone(),
                            has_structured_output,
                        }
                    }
                    other => other,
                };
                if parent_tx.send(event).await.is_err() {
                    warn!("parent event bus closed while sub-agent was running");
                }
            }
            let _ = driver.await;

            // Durable before the id is handed back for a future resume.
            session.wait_for_flush().await;

            if !finished {
                let message = failure_message
                    .unwrap_or_else(|| "Sub-agent task failed without a result".into());
                return SubAgentResult {
                    task_result: message,
                    session_id: session.id.clone(),
                    error: true,
                    task_metadata: metadata_for_task.lock().unwrap().clone(),
                };
            }
            SubAgentResult {
                task_result,
                session_id: session.id.clone(),
                error: false,
                task_metadata: metadata_for_task.lock().unwrap().clone(),
            }
        });

        let result = match orchestration.await {
            Ok(result) => result,
            Err(e) => SubAgentResult::failure(format!("Sub-agent task failed: {e}")),
        };
        drop(guard);
        result
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
