// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl std::fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// One entry in the agent's plan list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
    /// Present-continuous form shown while the item is in progress.
    #[serde(default)]
    pub active_form: String,
}

impl TodoItem {
    pub fn new(content: impl Into<String>, status: TodoStatus) -> Self {
        Self { content: content.into(), status, active_form: String::new() }
    }
}

/// Validate the single-in-progress invariant.  Returns a user-visible error
/// message on violation.
pub fn validate_todos(todos: &[TodoItem]) -> Result<(), String> {
    let in_progress = todos
        .iter()
        .filter(|t| t.status == TodoStatus::InProgress)
        .count();
    if in_progress > 1 {
        return Err(format!(
            "Only one task can be in_progress at a time, found {in_progress}"
        ));
    }
    Ok(())
}

/// Render the todo list in the bracketed form injected into reminders.
pub fn todo_list_str(todos: &[TodoItem]) -> String {
    let body: Vec<String> = todos
        .iter()
        .map(|t| format!("[{}] {}", t.status, t.content))
        .collect();
    format!("[{}]\n", body.join("\n"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_zero_or_one_in_progress() {
        let todos = vec![
            TodoItem::new("a", TodoStatus::Completed),
            TodoItem::new("b", TodoStatus::InProgress),
            TodoItem::new("c", TodoStatus::Pending),
        ];
        assert!(validate_todos(&todos).is_ok());
        assert!(validate_todos(&[]).is_ok());
    }

    #[test]
    fn validate_rejects_two_in_progress() {
        let todos = vec![
            TodoItem::new("a", TodoStatus::InProgress),
            TodoItem::new("b", TodoStatus::InProgress),
        ];
        let err = validate_todos(&todos).unwrap_err();
        assert!(err.contains("found 2"), "{err}");
    }

    #[test]
    fn todo_list_str_renders_status_prefixes() {
        let todos = vec![
            TodoItem::new("write tests", TodoStatus::Completed),
            TodoItem::new("run tests", TodoStatus::InProgress),
        ];
        let s = todo_list_str(&todos);
        assert!(s.contains("[completed] write tests"));
        assert!(s.contains("[in_progress] run tests"));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TodoStatus::InProgress).unwrap(),
            r#""in_progress""#
        );
    }
}
