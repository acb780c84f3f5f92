// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Wire-agnostic protocol types shared by every tandem crate.
//!
//! The conversation item model is the single currency of the system: provider
//! adapters emit it, the session log stores it, tool execution consumes and
//! produces it, and the UI event stream re-wraps it.

pub mod event;
pub mod item;
pub mod op;
pub mod todo;
pub mod tool;
pub mod usage;

pub use event::Event;
pub use item::{
    AssistantMessageDelta, AssistantMessageItem, ConversationItem, DeveloperMessageItem,
    ImagePart, InterruptItem, ReasoningEncryptedItem, ReasoningTextItem, ResponseMetadataItem,
    StartItem, StreamErrorItem, ToolCallItem, ToolCallStartItem, ToolResultItem, ToolStatus,
    UserMessageItem,
};
pub use op::{Operation, Submission, UserInputPayload};
pub use todo::{todo_list_str, validate_todos, TodoItem, TodoStatus};
pub use tool::{
    SubAgentResult, SubAgentState, ToolResultUiExtra, ToolSchema, ToolSideEffect, TruncationInfo,
};
pub use usage::{TaskMetadata, TaskMetadataItem, Usage};
