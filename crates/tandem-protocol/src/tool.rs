// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use crate::todo::TodoItem;
use crate::usage::TaskMetadata;

/// A tool schema as handed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: serde_json::Value,
}

/// Side effects a tool result can flag for the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSideEffect {
    TodoChange,
}

/// Record of a truncated tool output, pointing at the full text on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruncationInfo {
    pub saved_file_path: String,
    pub original_length: usize,
    pub truncated_length: usize,
}

/// Structured render hints attached to a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultUiExtra {
    DiffText {
        diff_text: String,
    },
    TodoList {
        todos: Vec<TodoItem>,
        /// Contents of entries that flipped to completed in this write.
        new_completed: Vec<String>,
    },
    SessionId {
        session_id: String,
    },
    Truncation(TruncationInfo),
}

// ─── Sub-agent protocol ───────────────────────────────────────────────────────

/// State describing one sub-agent invocation, persisted on the child session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAgentState {
    pub sub_agent_type: String,
    pub sub_agent_desc: String,
    pub sub_agent_prompt: String,
    /// Child session id to resume instead of creating a fresh session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<String>,
    /// When present, the child profile is wrapped to enforce structured
    /// output through a `report_back` tool matching this schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

/// What a nested agent run returns to the calling tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAgentResult {
    pub task_result: String,
    pub session_id: String,
    #[serde(default)]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_metadata: Option<TaskMetadata>,
}

impl SubAgentResult {
    pub fn failure(task_result: impl Into<String>) -> Self {
        Self {
            task_result: task_result.into(),
            session_id: String::new(),
            error: true,
            task_metadata: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ui_extra_diff_round_trip() {
        let extra = ToolResultUiExtra::DiffText { diff_text: "+x\n-y".into() };
        let json = serde_json::to_string(&extra).unwrap();
        assert!(json.contains(r#""type":"diff_text""#));
        let back: ToolResultUiExtra = serde_json::from_str(&json).unwrap();
        assert_eq!(back, extra);
    }

    #[test]
    fn sub_agent_state_omits_absent_optionals() {
        let state = SubAgentState {
            sub_agent_type: "Task".into(),
            sub_agent_desc: "explore".into(),
            sub_agent_prompt: "find the parser".into(),
            resume: None,
            output_schema: None,
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(!json.contains("resume"));
        assert!(!json.contains("output_schema"));
    }

    #[test]
    fn sub_agent_result_failure_flags_error() {
        let r = SubAgentResult::failure("it broke");
        assert!(r.error);
        assert!(r.session_id.is_empty());
    }
}
