// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item::{
    DeveloperMessageItem, ResponseMetadataItem, ToolStatus,
};
use crate::todo::TodoItem;
use crate::tool::{SubAgentState, ToolResultUiExtra};
use crate::usage::TaskMetadataItem;

/// Events emitted on the single ordered queue the UI consumes.
///
/// Conversation deltas are re-wrapped here with their session id so one
/// queue can interleave parent and sub-agent streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Welcome {
        session_id: String,
        model_name: String,
    },
    ReplayHistory {
        session_id: String,
        events: Vec<Event>,
        updated_at: DateTime<Utc>,
    },
    TaskStart {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sub_agent_state: Option<SubAgentState>,
    },
    TurnStart {
        session_id: String,
    },
    TurnEnd {
        session_id: String,
    },
    /// A user message re-emitted during history replay.
    UserMessage {
        session_id: String,
        content: String,
    },
    /// Reasoning text surfaced during streaming.
    Thinking {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
        content: String,
    },
    AssistantMessageDelta {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
        content: String,
    },
    AssistantMessage {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
        content: String,
    },
    /// A tool call is forming (name known, arguments still streaming).
    TurnToolCallStart {
        session_id: String,
        tool_call_id: String,
        tool_name: String,
    },
    ToolCall {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
        tool_call_id: String,
        tool_name: String,
        arguments: String,
    },
    ToolResult {
        session_id: String,
        tool_call_id: String,
        tool_name: String,
        result: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ui_extra: Option<ToolResultUiExtra>,
        status: ToolStatus,
    },
    ResponseMetadata {
        session_id: String,
        metadata: ResponseMetadataItem,
    },
    TaskMetadata {
        session_id: String,
        metadata: TaskMetadataItem,
    },
    TaskFinish {
        session_id: String,
        task_result: String,
        #[serde(default)]
        has_structured_output: bool,
    },
    TodoChange {
        session_id: String,
        todos: Vec<TodoItem>,
    },
    Interrupt {
        session_id: String,
    },
    DeveloperMessage {
        session_id: String,
        item: DeveloperMessageItem,
    },
    Error {
        message: String,
        can_retry: bool,
    },
    End,
}

impl Event {
    /// Session this event belongs to, when it is session-scoped.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Event::Welcome { session_id, .. }
            | Event::ReplayHistory { session_id, .. }
            | Event::TaskStart { session_id, .. }
            | Event::TurnStart { session_id }
            | Event::TurnEnd { session_id }
            | Event::UserMessage { session_id, .. }
            | Event::Thinking { session_id, .. }
            | Event::AssistantMessageDelta { session_id, .. }
            | Event::AssistantMessage { session_id, .. }
            | Event::TurnToolCallStart { session_id, .. }
            | Event::ToolCall { session_id, .. }
            | Event::ToolResult { session_id, .. }
            | Event::ResponseMetadata { session_id, .. }
            | Event::TaskMetadata { session_id, .. }
            | Event::TaskFinish { session_id, .. }
            | Event::TodoChange { session_id, .. }
            | Event::Interrupt { session_id }
            | Event::DeveloperMessage { session_id, .. } => Some(session_id),
            Event::Error { .. } | Event::End => None,
        }
    }

    /// Whether this event terminates a submitted operation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::TaskFinish { .. }
                | Event::Welcome { .. }
                | Event::Error { can_retry: false, .. }
                | Event::End
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_present_on_scoped_events() {
        let e = Event::TurnStart { session_id: "s1".into() };
        assert_eq!(e.session_id(), Some("s1"));
        assert!(Event::End.session_id().is_none());
    }

    #[test]
    fn terminal_events() {
        assert!(Event::TaskFinish {
            session_id: "s".into(),
            task_result: String::new(),
            has_structured_output: false,
        }
        .is_terminal());
        assert!(Event::Error { message: "x".into(), can_retry: false }.is_terminal());
        assert!(!Event::Error { message: "x".into(), can_retry: true }.is_terminal());
        assert!(!Event::TurnEnd { session_id: "s".into() }.is_terminal());
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let e = Event::ToolCall {
            session_id: "s".into(),
            response_id: None,
            tool_call_id: "c1".into(),
            tool_name: "Bash".into(),
            arguments: "{}".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains(r#""type":"tool_call""#), "{json}");
    }
}
