// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool registry and execution subsystem.
//!
//! A tool is a named, schema-described async function over a
//! [`ToolContext`].  The [`ToolExecutor`] runs one turn's batch of tool
//! calls: validating arguments, dispatching concurrently when the provider
//! allows it, truncating oversized outputs, and synthesizing `Interrupted`
//! results on cancellation.

pub mod cancel;
pub mod context;
pub mod executor;
pub mod registry;
pub mod tool;
pub mod tools;
pub mod truncate;

pub use cancel::{cancel_pair, CancelFlag, CancelHandle};
pub use context::{
    FileTracker, FreshnessError, PartialReport, PartialReports, Question, QuestionOption,
    SubAgentRunner, TodoContext, ToolContext, UserInteraction,
};
pub use executor::{ToolExecutor, ToolExecutorEvent};
pub use registry::ToolRegistry;
pub use tool::Tool;
pub use tools::{
    builtin_registry, ApplyPatchTool, AskUserQuestionTool, BashTool, EditTool, MultiEditTool,
    ReadTool, TodoWriteTool, WriteTool,
};
pub use truncate::{MAX_TOOL_OUTPUT_CHARS, TRUNCATION_HEAD_CHARS, TRUNCATION_TAIL_CHARS};

/// Canonical tool names.
pub mod names {
    pub const READ: &str = "Read";
    pub const EDIT: &str = "Edit";
    pub const MULTI_EDIT: &str = "MultiEdit";
    pub const WRITE: &str = "Write";
    pub const APPLY_PATCH: &str = "apply_patch";
    pub const BASH: &str = "Bash";
    pub const TODO_WRITE: &str = "TodoWrite";
    pub const ASK_USER_QUESTION: &str = "AskUserQuestion";
}
