// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The submission bus: the boundary between UI operations and agent work.
//!
//! One FIFO operation queue in, one totally-ordered event queue out.  The
//! dispatcher owns the session arena (id → agent entry); everything else
//! refers to sessions by id.  Interrupts are handled inline so they can
//! reach a running task; task work itself runs in spawned tasks that report
//! completion back to the dispatcher.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use tandem_config::Config;
use tandem_model::{create_client, LlmClient};
use tandem_protocol::{ConversationItem, Event, Operation, Submission, UserInputPayload};
use tandem_tools::{cancel_pair, CancelHandle, UserInteraction};

use crate::profile::{AgentProfile, DefaultModelProfileProvider, ModelProfileProvider};
use crate::session::SessionHandle;
use crate::sub_agent::{ClientFactory, SubAgentManager};
use crate::task::TaskExecutor;
use crate::turn::TurnDeps;

pub struct ExecutorConfig {
    pub config: Config,
    pub work_dir: PathBuf,
    /// Where sessions persist; `None` disables persistence entirely.
    pub sessions_dir: Option<PathBuf>,
    /// UI callback answering `AskUserQuestion`; absent in headless runs.
    pub user_interaction: Option<Arc<dyn UserInteraction>>,
    /// Client construction override for embedding and tests.  `""` selects
    /// the main model; a sub-agent type name selects its model.
    pub client_factory: Option<ClientFactory>,
}

impl ExecutorConfig {
    pub fn new(config: Config, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            work_dir: work_dir.into(),
            sessions_dir: default_sessions_dir(),
            user_interaction: None,
            client_factory: None,
        }
    }
}

pub fn default_sessions_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("tandem").join("sessions"))
}

fn default_client_factory(config: Arc<Config>) -> ClientFactory {
    Arc::new(move |selector: &str| {
        let (_, model) = if selector.is_empty() {
            config.main_model()?
        } else {
            config.sub_agent_model(selector)?
        };
        create_client(model)
    })
}

struct AgentEntry {
    session: SessionHandle,
    profile: AgentProfile,
    cancel: Option<CancelHandle>,
    running: bool,
}

/// The submission-bus executor.
pub struct Executor {
    ops_tx: mpsc::Sender<Submission>,
    event_rx: Option<mpsc::Receiver<Event>>,
    pending: Arc<StdMutex<HashMap<String, oneshot::Receiver<()>>>>,
    completions: Arc<StdMutex<HashMap<String, oneshot::Sender<()>>>>,
}

impl Executor {
    /// Build the executor and start its dispatcher.  Must run inside a
    /// tokio runtime.
    pub fn new(config: ExecutorConfig) -> Self {
        let (ops_tx, ops_rx) = mpsc::channel::<Submission>(64);
        let (event_tx, event_rx) = mpsc::channel::<Event>(1024);
        let completions: Arc<StdMutex<HashMap<String, oneshot::Sender<()>>>> = Arc::default();

        let dispatcher = Dispatcher::new(config, event_tx, completions.clone());
        tokio::spawn(dispatcher.run(ops_rx));

        Self {
            ops_tx,
            event_rx: Some(event_rx),
            pending: Arc::default(),
            completions,
        }
    }

    /// The single ordered event queue.  Callable once.
    pub fn take_event_receiver(&mut self) -> mpsc::Receiver<Event> {
        self.event_rx.take().expect("event receiver already taken")
    }

    /// Submit an operation; returns its submission id.
    pub async fn submit(&self, op: Operation) -> String {
        let submission = Submission::new(op);
        let id = submission.id.clone();
        let (done_tx, done_rx) = oneshot::channel();
        self.completions.lock().unwrap().insert(id.clone(), done_tx);
        self.pending.lock().unwrap().insert(id.clone(), done_rx);
        if self.ops_tx.send(submission).await.is_err() {
            warn!("executor dispatcher is gone; dropping submission");
        }
        id
    }

    /// Resolve when the submission's terminal event has been enqueued.
    pub async fn wait_for(&self, id: &str) {
        let rx = self.pending.lock().unwrap().remove(id);
        if let Some(rx) = rx {
            let _ = rx.await;
        }
    }
}

struct Dispatcher {
    config: Arc<Config>,
    work_dir: PathBuf,
    sessions_dir: Option<PathBuf>,
    user_interaction: Option<Arc<dyn UserInteraction>>,
    client_factory: ClientFactory,
    profile_provider: Arc<dyn ModelProfileProvider>,
    event_tx: mpsc::Sender<Event>,
    completions: Arc<StdMutex<HashMap<String, oneshot::Sender<()>>>>,
    agents: HashMap<String, AgentEntry>,
}

impl Dispatcher {
    fn new(
        config: ExecutorConfig,
        event_tx: mpsc::Sender<Event>,
        completions: Arc<StdMutex<HashMap<String, oneshot::Sender<()>>>>,
    ) -> Self {
        let shared_config = Arc::new(config.config);
        let client_factory = config
            .client_factory
            .unwrap_or_else(|| default_client_factory(shared_config.clone()));
        Self {
            config: shared_config,
            profile_provider: Arc::new(DefaultModelProfileProvider::new(&config.work_dir)),
            work_dir: config.work_dir,
            sessions_dir: config.sessions_dir,
            user_interaction: config.user_interaction,
            client_factory,
            event_tx,
            completions,
            agents: HashMap::new(),
        }
    }

    async fn run(mut self, mut ops_rx: mpsc::Receiver<Submission>) {
        let (done_tx, mut done_rx) = mpsc::channel::<(String, String)>(64);
        loop {
            tokio::select! {
                submission = ops_rx.recv() => match submission {
                    Some(Submission { id, op }) => self.dispatch(id, op, &done_tx).await,
                    None => break,
                },
                finished = done_rx.recv() => {
                    if let Some((session_id, submission_id)) = finished {
                        if let Some(entry) = self.agents.get_mut(&session_id) {
                            entry.running = false;
                            entry.cancel = None;
                        }
                        self.resolve(&submission_id);
                    }
                }
            }
        }
        let _ = self.event_tx.send(Event::End).await;
    }

    fn resolve(&self, submission_id: &str) {
        if let Some(done) = self.completions.lock().unwrap().remove(submission_id) {
            let _ = done.send(());
        }
    }

    async fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event).await;
    }

    async fn dispatch(
        &mut self,
        submission_id: String,
        op: Operation,
        done_tx: &mpsc::Sender<(String, String)>,
    ) {
        debug!(?op, "dispatching operation");
        match op {
            Operation::InitAgent { session_id } => {
                self.init_agent(session_id).await;
                self.resolve(&submission_id);
            }
            Operation::UserInput { session_id, payload } => {
                self.user_input(session_id, payload, submission_id, done_tx).await;
            }
            Operation::Interrupt { target_session_id } => {
                self.interrupt(target_session_id.as_deref());
                self.resolve(&submission_id);
            }
        }
    }

    async fn init_agent(&mut self, session_id: Option<String>) {
        let client: Arc<dyn LlmClient> = match (self.client_factory)("") {
            Ok(client) => client,
            Err(e) => {
                self.emit(Event::Error {
                    message: format!("Cannot initialize agent: {e}"),
                    can_retry: false,
                })
                .await;
                return;
            }
        };

        let (session, replaying) = match session_id {
            Some(id) => {
                let Some(sessions_dir) = &self.sessions_dir else {
                    self.emit(Event::Error {
                        message: "Session persistence is disabled; cannot resume.".into(),
                        can_retry: false,
                    })
                    .await;
                    return;
                };
                match SessionHandle::load(&id, sessions_dir) {
                    Ok(session) => (session, true),
                    Err(e) => {
                        self.emit(Event::Error { message: e.to_string(), can_retry: false }).await;
                        return;
                    }
                }
            }
            None => (SessionHandle::new(&self.work_dir, self.sessions_dir.as_deref()), false),
        };

        let profile = self.profile_provider.build_profile(client.clone(), None, None);
        session.set_model_name(client.model_name()).await;

        self.emit(Event::Welcome {
            session_id: session.id.clone(),
            model_name: client.model_name().to_string(),
        })
        .await;
        if replaying {
            let history = session.history().await;
            if !history.is_empty() {
                self.emit(Event::ReplayHistory {
                    session_id: session.id.clone(),
                    events: replay_events(&session.id, &history),
                    updated_at: session.updated_at().await,
                })
                .await;
            }
        }

        self.agents.insert(
            session.id.clone(),
            AgentEntry { session, profile, cancel: None, running: false },
        );
    }

    async fn user_input(
        &mut self,
        session_id: String,
        payload: UserInputPayload,
        submission_id: String,
        done_tx: &mpsc::Sender<(String, String)>,
    ) {
        let Some(entry) = self.agents.get_mut(&session_id) else {
            self.emit(Event::Error {
                message: format!("Unknown session: {session_id}"),
                can_retry: false,
            })
            .await;
            self.resolve(&submission_id);
            return;
        };
        if entry.running {
            self.emit(Event::Error {
                message: "Session is busy with another task.".into(),
                can_retry: true,
            })
            .await;
            self.resolve(&submission_id);
            return;
        }

        let (cancel_handle, cancel_flag) = cancel_pair();
        entry.cancel = Some(cancel_handle);
        entry.running = true;

        let sub_agents = Arc::new(SubAgentManager::new(
            self.event_tx.clone(),
            self.client_factory.clone(),
            self.profile_provider.clone(),
            self.work_dir.clone(),
            self.sessions_dir.clone(),
            self.config.bash_timeout_secs,
        ));
        let deps = TurnDeps {
            sub_agents: Some(sub_agents),
            user_interaction: self.user_interaction.clone(),
            bash_timeout_secs: self.config.bash_timeout_secs,
        };
        let mut task =
            TaskExecutor::new(entry.session.clone(), entry.profile.clone(), deps, cancel_flag);

        let event_tx = self.event_tx.clone();
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            task.run(payload, event_tx).await;
            let _ = done_tx.send((session_id, submission_id)).await;
        });
    }

    fn interrupt(&mut self, target_session_id: Option<&str>) {
        for (session_id, entry) in self.agents.iter_mut() {
            let matches = match target_session_id {
                Some(target) => session_id == target,
                None => true,
            };
            if matches {
                if let Some(cancel) = entry.cancel.take() {
                    debug!(session_id = %session_id, "interrupting task");
                    cancel.cancel();
                }
            }
        }
    }
}

/// Map persisted history back into the events a fresh UI needs to render it.
/// Unknown or stream-bookkeeping items are skipped.
fn replay_events(session_id: &str, history: &[ConversationItem]) -> Vec<Event> {
    let mut events = Vec::new();
    for item in history {
        let event = match item {
            ConversationItem::User(m) => Some(Event::UserMessage {
                session_id: session_id.to_string(),
                content: m.content.clone(),
            }),
            ConversationItem::Assistant(m) => Some(Event::AssistantMessage {
                session_id: session_id.to_string(),
                response_id: m.response_id.clone(),
                content: m.content.clone(),
            }),
            ConversationItem::ReasoningText(r) => Some(Event::Thinking {
                session_id: session_id.to_string(),
                response_id: r.response_id.clone(),
                content: r.content.clone(),
            }),
            ConversationItem::ToolCall(c) => Some(Event::ToolCall {
                session_id: session_id.to_string(),
                response_id: c.response_id.clone(),
                tool_call_id: c.call_id.clone(),
                tool_name: c.name.clone(),
                arguments: c.arguments.clone(),
            }),
            ConversationItem::ToolResult(r) => Some(Event::ToolResult {
                session_id: session_id.to_string(),
                tool_call_id: r.call_id.clone(),
                tool_name: r.tool_name.clone().unwrap_or_default(),
                result: r.output.clone().unwrap_or_default(),
                ui_extra: r.ui_extra.clone(),
                status: r.status,
            }),
            ConversationItem::Developer(item) => Some(Event::DeveloperMessage {
                session_id: session_id.to_string(),
                item: item.clone(),
            }),
            ConversationItem::TaskMetadata(m) => Some(Event::TaskMetadata {
                session_id: session_id.to_string(),
                metadata: m.clone(),
            }),
            ConversationItem::Interrupt(_) => {
                Some(Event::Interrupt { session_id: session_id.to_string() })
            }
            _ => None,
        };
        events.extend(event);
    }
    events
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
