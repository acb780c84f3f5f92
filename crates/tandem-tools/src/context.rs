// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The per-call context handed to every tool invocation.
//!
//! Tools are pure over this context: the file tracker, the todo list, the
//! cancellation flag, and the optional sub-agent / user-interaction
//! callbacks all arrive explicitly.  No tool reaches for globals.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use tandem_protocol::{SubAgentResult, SubAgentState, TaskMetadata, TodoItem};

use crate::cancel::CancelFlag;

// ─── File tracker ─────────────────────────────────────────────────────────────

/// Why an edit tool refused to touch a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessError {
    /// The agent never read the file (or it was forgotten after a delete).
    NotRead,
    /// The file changed on disk since the agent last observed it.
    ModifiedExternally,
}

impl FreshnessError {
    /// The user-visible message naming the recovery action.
    pub fn message(&self) -> &'static str {
        match self {
            Self::NotRead => "File has not been read yet. Read it first before writing to it.",
            Self::ModifiedExternally => {
                "File has been modified externally. Either by user or a linter. \
                 Read it first before writing to it."
            }
        }
    }
}

/// Session-scoped map of absolute path → observed modification time, used to
/// guard edit tools against external changes.
#[derive(Debug, Default)]
pub struct FileTracker {
    entries: HashMap<PathBuf, SystemTime>,
}

impl FileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the file's current mtime as observed.
    pub fn track(&mut self, path: &Path) -> std::io::Result<()> {
        let mtime = std::fs::metadata(path)?.modified()?;
        self.entries.insert(path.to_path_buf(), mtime);
        Ok(())
    }

    pub fn forget(&mut self, path: &Path) {
        self.entries.remove(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    /// Check that the file was read and has not changed since.
    pub fn check_fresh(&self, path: &Path) -> Result<(), FreshnessError> {
        let tracked = self.entries.get(path).ok_or(FreshnessError::NotRead)?;
        let current = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|_| FreshnessError::ModifiedExternally)?;
        if current != *tracked {
            return Err(FreshnessError::ModifiedExternally);
        }
        Ok(())
    }

    /// Paths whose on-disk mtime no longer matches the tracked one.
    pub fn changed_paths(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter(|(path, tracked)| {
                match std::fs::metadata(path).and_then(|m| m.modified()) {
                    Ok(current) => current != **tracked,
                    Err(_) => false,
                }
            })
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Todo context ─────────────────────────────────────────────────────────────

/// Session-scoped plan list plus bookkeeping the reminders consult.
#[derive(Debug, Default, Clone)]
pub struct TodoContext {
    pub todos: Vec<TodoItem>,
    /// Turns elapsed since the list was last written.
    pub turns_since_update: u32,
}

impl TodoContext {
    pub fn replace(&mut self, todos: Vec<TodoItem>) {
        self.todos = todos;
        self.turns_since_update = 0;
    }
}

// ─── Callbacks into the core ──────────────────────────────────────────────────

/// Runs a nested agent on behalf of a sub-agent tool.  Implemented by the
/// core's sub-agent manager; the tools crate only sees the trait.
#[async_trait]
pub trait SubAgentRunner: Send + Sync {
    /// `call_id` keys the partial-progress registration in `reports`.
    async fn run(
        &self,
        state: SubAgentState,
        call_id: &str,
        reports: &PartialReports,
    ) -> SubAgentResult;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub multi_select: bool,
}

/// Pauses the tool batch to ask the human something.  Implemented by the
/// executor boundary; absent in headless contexts.
#[async_trait]
pub trait UserInteraction: Send + Sync {
    /// Returns the user's answer, or `None` when the interaction was
    /// dismissed.
    async fn ask(&self, questions: Vec<Question>) -> Option<String>;
}

// ─── Partial-progress reports ─────────────────────────────────────────────────

pub type ProgressGetter = Box<dyn Fn() -> Option<String> + Send + Sync>;
pub type MetadataGetter = Box<dyn Fn() -> Option<TaskMetadata> + Send + Sync>;

/// Getters a long-running tool registers so cancellation can report what it
/// had accomplished.
#[derive(Default)]
pub struct PartialReport {
    pub progress: Option<ProgressGetter>,
    pub metadata: Option<MetadataGetter>,
}

/// Registry of partial reports keyed by tool call id.
#[derive(Clone, Default)]
pub struct PartialReports(Arc<StdMutex<HashMap<String, PartialReport>>>);

impl PartialReports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, call_id: impl Into<String>, report: PartialReport) {
        self.0.lock().unwrap().insert(call_id.into(), report);
    }

    pub fn take(&self, call_id: &str) -> Option<PartialReport> {
        self.0.lock().unwrap().remove(call_id)
    }
}

// ─── Tool context ─────────────────────────────────────────────────────────────

/// Everything a tool may touch during one invocation.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub work_dir: PathBuf,
    pub file_tracker: Arc<Mutex<FileTracker>>,
    pub todos: Arc<Mutex<TodoContext>>,
    pub cancel: CancelFlag,
    pub bash_timeout_secs: u64,
    /// Where truncated outputs keep their full text.
    pub truncation_dir: PathBuf,
    pub sub_agents: Option<Arc<dyn SubAgentRunner>>,
    pub user_interaction: Option<Arc<dyn UserInteraction>>,
    pub partial_reports: PartialReports,
}

impl ToolContext {
    /// A minimal context rooted at `work_dir`, without sub-agent or user
    /// interaction callbacks.
    pub fn new(session_id: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        let truncation_dir = work_dir.join(".tandem").join("truncation");
        Self {
            session_id: session_id.into(),
            work_dir,
            file_tracker: Arc::new(Mutex::new(FileTracker::new())),
            todos: Arc::new(Mutex::new(TodoContext::default())),
            cancel: CancelFlag::inert(),
            bash_timeout_secs: 60,
            truncation_dir,
            sub_agents: None,
            user_interaction: None,
            partial_reports: PartialReports::new(),
        }
    }

    /// Resolve a tool-supplied path against the workspace.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.work_dir.join(p)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
