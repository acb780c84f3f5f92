// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use tandem_protocol::{
    validate_todos, TodoItem, TodoStatus, ToolCallItem, ToolResultItem, ToolResultUiExtra,
    ToolSchema, ToolSideEffect,
};

use crate::context::ToolContext;
use crate::names::TODO_WRITE;
use crate::tool::Tool;

#[derive(Debug, Deserialize)]
struct TodoWriteArguments {
    todos: Vec<IncomingTodo>,
}

#[derive(Debug, Deserialize)]
struct IncomingTodo {
    content: String,
    status: TodoStatus,
    #[serde(default, alias = "activeForm")]
    active_form: String,
}

pub struct TodoWriteTool;

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        TODO_WRITE
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: TODO_WRITE.into(),
            description: "Replaces the task list used to track progress through a multi-step \
                task. Use it to plan work, mark the current step in_progress, and mark steps \
                completed as soon as they are done. At most one entry may be in_progress at \
                a time."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "todos": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "content": { "type": "string" },
                                "status": {
                                    "type": "string",
                                    "enum": ["pending", "in_progress", "completed"]
                                },
                                "active_form": {
                                    "type": "string",
                                    "description": "Present-continuous label shown while in progress"
                                }
                            },
                            "required": ["content", "status"],
                            "additionalProperties": false
                        },
                        "description": "The full replacement todo list"
                    }
                },
                "required": ["todos"],
                "additionalProperties": false
            }),
        }
    }

    async fn call(&self, call: &ToolCallItem, ctx: &ToolContext) -> ToolResultItem {
        let args: TodoWriteArguments = match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(e) => return ToolResultItem::error(format!("Invalid arguments: {e}")),
        };
        let todos: Vec<TodoItem> = args
            .todos
            .into_iter()
            .map(|t| TodoItem { content: t.content, status: t.status, active_form: t.active_form })
            .collect();

        if let Err(message) = validate_todos(&todos) {
            return ToolResultItem::error(format!("<tool_use_error>{message}</tool_use_error>"));
        }

        let new_completed: Vec<String>;
        {
            let mut todo_ctx = ctx.todos.lock().await;
            let previously_completed: Vec<&str> = todo_ctx
                .todos
                .iter()
                .filter(|t| t.status == TodoStatus::Completed)
                .map(|t| t.content.as_str())
                .collect();
            new_completed = todos
                .iter()
                .filter(|t| {
                    t.status == TodoStatus::Completed
                        && !previously_completed.contains(&t.content.as_str())
                })
                .map(|t| t.content.clone())
                .collect();
            todo_ctx.replace(todos.clone());
        }

        ToolResultItem::success(
            "Todos have been modified successfully. Ensure that you continue to use the todo \
             list to track your progress. Please proceed with the current tasks if applicable.",
        )
        .with_ui_extra(ToolResultUiExtra::TodoList { todos, new_completed })
        .with_side_effect(ToolSideEffect::TodoChange)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_protocol::ToolStatus;

    fn todo_call(args: serde_json::Value) -> ToolCallItem {
        ToolCallItem::new("c1", TODO_WRITE, args.to_string(), None)
    }

    #[tokio::test]
    async fn replaces_the_list_and_flags_side_effect() {
        let ctx = ToolContext::new("s1", std::env::temp_dir());
        let result = TodoWriteTool
            .call(
                &todo_call(json!({"todos": [
                    {"content": "write tests", "status": "in_progress", "active_form": "Writing tests"},
                    {"content": "run tests", "status": "pending"}
                ]})),
                &ctx,
            )
            .await;
        assert_eq!(result.status, ToolStatus::Success);
        assert!(result.side_effects.contains(&ToolSideEffect::TodoChange));
        let todos = &ctx.todos.lock().await.todos;
        assert_eq!(todos.len(), 2);
        assert_eq!(todos[0].status, TodoStatus::InProgress);
    }

    #[tokio::test]
    async fn two_in_progress_entries_are_rejected() {
        let ctx = ToolContext::new("s1", std::env::temp_dir());
        let result = TodoWriteTool
            .call(
                &todo_call(json!({"todos": [
                    {"content": "a", "status": "in_progress"},
                    {"content": "b", "status": "in_progress"}
                ]})),
                &ctx,
            )
            .await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.output.unwrap().contains("Only one task can be in_progress"));
        assert!(ctx.todos.lock().await.todos.is_empty(), "list unchanged on error");
    }

    #[tokio::test]
    async fn newly_completed_entries_are_reported() {
        let ctx = ToolContext::new("s1", std::env::temp_dir());
        ctx.todos.lock().await.replace(vec![
            TodoItem::new("old done", TodoStatus::Completed),
            TodoItem::new("task", TodoStatus::InProgress),
        ]);
        let result = TodoWriteTool
            .call(
                &todo_call(json!({"todos": [
                    {"content": "old done", "status": "completed"},
                    {"content": "task", "status": "completed"}
                ]})),
                &ctx,
            )
            .await;
        match result.ui_extra {
            Some(ToolResultUiExtra::TodoList { new_completed, .. }) => {
                assert_eq!(new_completed, vec!["task".to_string()]);
            }
            other => panic!("expected todo list, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn camel_case_active_form_is_accepted() {
        let ctx = ToolContext::new("s1", std::env::temp_dir());
        let result = TodoWriteTool
            .call(
                &todo_call(json!({"todos": [
                    {"content": "x", "status": "pending", "activeForm": "Doing x"}
                ]})),
                &ctx,
            )
            .await;
        assert_eq!(result.status, ToolStatus::Success);
        assert_eq!(ctx.todos.lock().await.todos[0].active_form, "Doing x");
    }
}
