// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The session: an append-only conversation log plus the session-scoped
//! state the tools need (file tracker, todo context).
//!
//! Persistence is debounced behind an async flusher task writing one JSON
//! document per session; [`SessionHandle::wait_for_flush`] is the sync
//! point callers await before handing the session id to anyone who will
//! resume it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use tandem_protocol::{ConversationItem, SubAgentState};
use tandem_tools::{FileTracker, TodoContext};

/// Debounce window between an append and the disk write.
const FLUSH_DEBOUNCE_MS: u64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionMeta {
    session_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    work_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    first_user_message: Option<String>,
    messages_count: usize,
}

/// The on-disk shape: meta header plus the verbatim history.
#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    meta: SessionMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub_agent_state: Option<SubAgentState>,
    history: Vec<ConversationItem>,
}

#[derive(Debug)]
struct SessionState {
    history: Vec<ConversationItem>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    model_name: Option<String>,
    sub_agent_state: Option<SubAgentState>,
}

/// Cloneable handle to one session.  The conversation log lives behind a
/// lock; identity and working directory are immutable and readable without
/// one.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: String,
    pub work_dir: PathBuf,
    pub file_tracker: Arc<Mutex<FileTracker>>,
    pub todos: Arc<Mutex<TodoContext>>,
    state: Arc<Mutex<SessionState>>,
    storage_path: Option<PathBuf>,
    dirty_tx: Arc<watch::Sender<u64>>,
    flushed_rx: watch::Receiver<u64>,
}

impl SessionHandle {
    /// Create a fresh session.  `sessions_dir = None` keeps it in memory
    /// only (sub-agent tests, ephemeral runs).
    pub fn new(work_dir: impl Into<PathBuf>, sessions_dir: Option<&Path>) -> Self {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let state = SessionState {
            history: Vec::new(),
            created_at: now,
            updated_at: now,
            model_name: None,
            sub_agent_state: None,
        };
        Self::from_state(id, work_dir.into(), state, sessions_dir)
    }

    /// Load a persisted session for resume.
    pub fn load(session_id: &str, sessions_dir: &Path) -> anyhow::Result<Self> {
        let path = sessions_dir.join(format!("{session_id}.json"));
        let text = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("cannot read session {session_id}: {e}"))?;
        let file: SessionFile = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("cannot parse session {session_id}: {e}"))?;
        let state = SessionState {
            history: file.history,
            created_at: file.meta.created_at,
            updated_at: file.meta.updated_at,
            model_name: file.meta.model_name,
            sub_agent_state: file.sub_agent_state,
        };
        Ok(Self::from_state(
            file.meta.session_id,
            file.meta.work_dir,
            state,
            Some(sessions_dir),
        ))
    }

    fn from_state(
        id: String,
        work_dir: PathBuf,
        state: SessionState,
        sessions_dir: Option<&Path>,
    ) -> Self {
        let storage_path = sessions_dir.map(|dir| dir.join(format!("{id}.json")));
        let (dirty_tx, dirty_rx) = watch::channel(0u64);
        let (flushed_tx, flushed_rx) = watch::channel(0u64);
        let handle = Self {
            id,
            work_dir,
            file_tracker: Arc::new(Mutex::new(FileTracker::new())),
            todos: Arc::new(Mutex::new(TodoContext::default())),
            state: Arc::new(Mutex::new(state)),
            storage_path,
            dirty_tx: Arc::new(dirty_tx),
            flushed_rx,
        };
        if handle.storage_path.is_some() {
            handle.spawn_flusher(dirty_rx, flushed_tx);
        }
        handle
    }

    fn spawn_flusher(&self, mut dirty_rx: watch::Receiver<u64>, flushed_tx: watch::Sender<u64>) {
        let handle = self.clone();
        tokio::spawn(async move {
            while dirty_rx.changed().await.is_ok() {
                let version = *dirty_rx.borrow();
                tokio::time::sleep(std::time::Duration::from_millis(FLUSH_DEBOUNCE_MS)).await;
                // Coalesce appends that landed during the debounce window.
                let version = version.max(*dirty_rx.borrow_and_update());
                if let Err(e) = handle.write_to_disk().await {
                    warn!(session_id = %handle.id, error = %e, "session flush failed");
                }
                let _ = flushed_tx.send(version);
            }
        });
    }

    async fn write_to_disk(&self) -> anyhow::Result<()> {
        let Some(path) = &self.storage_path else { return Ok(()) };
        let file = {
            let state = self.state.lock().await;
            SessionFile {
                meta: SessionMeta {
                    session_id: self.id.clone(),
                    created_at: state.created_at,
                    updated_at: state.updated_at,
                    work_dir: self.work_dir.clone(),
                    model_name: state.model_name.clone(),
                    first_user_message: state.history.iter().find_map(|item| match item {
                        ConversationItem::User(m) => Some(m.content.clone()),
                        _ => None,
                    }),
                    messages_count: state.history.len(),
                },
                sub_agent_state: state.sub_agent_state.clone(),
                history: state.history.clone(),
            }
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so a crash never leaves a torn file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&file)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(session_id = %self.id, "session flushed");
        Ok(())
    }

    /// Append items to the log.  Streaming-only items are skipped; the rest
    /// land in the exact order given.
    pub async fn append(&self, items: impl IntoIterator<Item = ConversationItem>) {
        let mut appended = false;
        {
            let mut state = self.state.lock().await;
            for item in items {
                if !item.is_persisted() {
                    continue;
                }
                state.history.push(item);
                appended = true;
            }
            if appended {
                state.updated_at = Utc::now();
            }
        }
        if appended {
            self.mark_dirty();
        }
    }

    fn mark_dirty(&self) {
        self.dirty_tx.send_modify(|version| *version += 1);
    }

    pub async fn history(&self) -> Vec<ConversationItem> {
        self.state.lock().await.history.clone()
    }

    pub async fn updated_at(&self) -> DateTime<Utc> {
        self.state.lock().await.updated_at
    }

    pub async fn set_model_name(&self, model_name: &str) {
        self.state.lock().await.model_name = Some(model_name.to_string());
        self.mark_dirty();
    }

    pub async fn sub_agent_state(&self) -> Option<SubAgentState> {
        self.state.lock().await.sub_agent_state.clone()
    }

    pub async fn set_sub_agent_state(&self, state: SubAgentState) {
        self.state.lock().await.sub_agent_state = Some(state);
        self.mark_dirty();
    }

    /// The content of the most recent assistant message, if any.
    pub async fn last_assistant_message(&self) -> Option<String> {
        let state = self.state.lock().await;
        state.history.iter().rev().find_map(|item| match item {
            ConversationItem::Assistant(m) => Some(m.content.clone()),
            _ => None,
        })
    }

    /// Await durability of everything appended so far.
    pub async fn wait_for_flush(&self) {
        if self.storage_path.is_none() {
            return;
        }
        let target = *self.dirty_tx.borrow();
        let mut rx = self.flushed_rx.clone();
        while *rx.borrow() < target {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_protocol::{
        AssistantMessageDelta, AssistantMessageItem, ToolCallStartItem, UserMessageItem,
    };

    #[tokio::test]
    async fn new_sessions_have_unique_ids() {
        let a = SessionHandle::new("/tmp", None);
        let b = SessionHandle::new("/tmp", None);
        assert_ne!(a.id, b.id);
        assert!(a.history().await.is_empty());
    }

    #[tokio::test]
    async fn append_skips_streaming_items() {
        let session = SessionHandle::new("/tmp", None);
        session
            .append([
                ConversationItem::User(UserMessageItem::new("hi")),
                ConversationItem::AssistantDelta(AssistantMessageDelta::new("h", None)),
                ConversationItem::ToolCallStart(ToolCallStartItem::new("c1", "Read", None)),
                ConversationItem::Assistant(AssistantMessageItem::new("hello", None)),
            ])
            .await;
        let history = session.history().await;
        assert_eq!(history.len(), 2);
        assert!(matches!(history[0], ConversationItem::User(_)));
        assert!(matches!(history[1], ConversationItem::Assistant(_)));
    }

    #[tokio::test]
    async fn last_assistant_message_finds_most_recent() {
        let session = SessionHandle::new("/tmp", None);
        assert!(session.last_assistant_message().await.is_none());
        session
            .append([
                ConversationItem::Assistant(AssistantMessageItem::new("first", None)),
                ConversationItem::User(UserMessageItem::new("more")),
                ConversationItem::Assistant(AssistantMessageItem::new("second", None)),
            ])
            .await;
        assert_eq!(session.last_assistant_message().await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn persisted_session_round_trips_through_load() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionHandle::new("/workspace", Some(dir.path()));
        session
            .append([
                ConversationItem::User(UserMessageItem::new("remember me")),
                ConversationItem::Assistant(AssistantMessageItem::new("noted", None)),
            ])
            .await;
        session.set_model_name("test-model").await;
        session.wait_for_flush().await;

        let loaded = SessionHandle::load(&session.id, dir.path()).unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.work_dir, PathBuf::from("/workspace"));
        let history = loaded.history().await;
        assert_eq!(history.len(), 2);
        assert!(matches!(&history[0], ConversationItem::User(m) if m.content == "remember me"));
    }

    #[tokio::test]
    async fn meta_records_first_user_message_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionHandle::new("/w", Some(dir.path()));
        session
            .append([ConversationItem::User(UserMessageItem::new("the very first"))])
            .await;
        session.wait_for_flush().await;
        let text =
            std::fs::read_to_string(dir.path().join(format!("{}.json", session.id))).unwrap();
        let file: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(file["meta"]["first_user_message"], "the very first");
        assert_eq!(file["meta"]["messages_count"], 1);
    }

    #[tokio::test]
    async fn load_unknown_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SessionHandle::load("missing-id", dir.path()).is_err());
    }

    #[tokio::test]
    async fn sub_agent_state_survives_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionHandle::new("/w", Some(dir.path()));
        session
            .set_sub_agent_state(SubAgentState {
                sub_agent_type: "Explore".into(),
                sub_agent_desc: "find usages".into(),
                sub_agent_prompt: "look around".into(),
                resume: None,
                output_schema: None,
            })
            .await;
        session.wait_for_flush().await;
        let loaded = SessionHandle::load(&session.id, dir.path()).unwrap();
        let state = loaded.sub_agent_state().await.unwrap();
        assert_eq!(state.sub_agent_type, "Explore");
    }
}
