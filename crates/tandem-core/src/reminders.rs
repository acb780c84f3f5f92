// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Developer-message reminders injected ahead of main-agent turns.
//!
//! Each reminder is a pure function over a session snapshot.  They run in
//! declared order before every turn; a kind that has already fired during
//! the current task is suppressed.

use std::collections::HashSet;
use std::path::PathBuf;

use tandem_protocol::{todo_list_str, DeveloperMessageItem, TodoItem, TodoStatus};

use crate::consts::TODO_STALE_TURNS;

/// Snapshot of the session state the reminders inspect.
#[derive(Debug, Default, Clone)]
pub struct ReminderContext {
    pub todos: Vec<TodoItem>,
    pub turns_since_todo_update: u32,
    pub changed_files: Vec<PathBuf>,
    pub is_first_turn: bool,
}

#[derive(Clone, Copy)]
pub struct Reminder {
    pub kind: &'static str,
    pub check: fn(&ReminderContext) -> Option<String>,
}

fn empty_todo(ctx: &ReminderContext) -> Option<String> {
    if !ctx.is_first_turn || !ctx.todos.is_empty() {
        return None;
    }
    Some(
        "This is a reminder that your to-do list is currently empty. DO NOT mention this \
         to the user explicitly because they are already aware. If you are working on tasks \
         that would benefit from a todo list please use the TodoWrite tool to create one. \
         If not, please feel free to ignore."
            .into(),
    )
}

fn todo_not_used_recently(ctx: &ReminderContext) -> Option<String> {
    if ctx.todos.is_empty() || ctx.turns_since_todo_update < TODO_STALE_TURNS {
        return None;
    }
    let open: Vec<&TodoItem> = ctx
        .todos
        .iter()
        .filter(|t| t.status != TodoStatus::Completed)
        .collect();
    if open.is_empty() {
        return None;
    }
    Some(format!(
        "The TodoWrite tool hasn't been used recently. If you're working on tasks that would \
         benefit from tracking progress, consider updating the todo list. Current list:\n{}",
        todo_list_str(&ctx.todos)
    ))
}

fn file_changed_externally(ctx: &ReminderContext) -> Option<String> {
    if ctx.changed_files.is_empty() {
        return None;
    }
    let listing: Vec<String> = ctx
        .changed_files
        .iter()
        .map(|p| format!("- {}", p.display()))
        .collect();
    Some(format!(
        "The following files changed on disk since you last read them. Re-read them before \
         editing:\n{}",
        listing.join("\n")
    ))
}

/// The main agent's reminder list, in firing order.
pub fn main_agent_reminders() -> Vec<Reminder> {
    vec![
        Reminder { kind: "empty_todo", check: empty_todo },
        Reminder { kind: "todo_not_used_recently", check: todo_not_used_recently },
        Reminder { kind: "file_changed_externally", check: file_changed_externally },
    ]
}

/// Run the reminders that have not fired yet this task, marking fired kinds.
pub fn run_reminders(
    reminders: &[Reminder],
    ctx: &ReminderContext,
    fired: &mut HashSet<&'static str>,
) -> Vec<DeveloperMessageItem> {
    let mut out = Vec::new();
    for reminder in reminders {
        if fired.contains(reminder.kind) {
            continue;
        }
        if let Some(content) = (reminder.check)(ctx) {
            fired.insert(reminder.kind);
            out.push(DeveloperMessageItem::reminder(reminder.kind, content));
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_todo_fires_only_on_first_turn() {
        let mut ctx = ReminderContext { is_first_turn: true, ..Default::default() };
        assert!(empty_todo(&ctx).is_some());
        ctx.is_first_turn = false;
        assert!(empty_todo(&ctx).is_none());
        ctx.is_first_turn = true;
        ctx.todos.push(TodoItem::new("x", TodoStatus::Pending));
        assert!(empty_todo(&ctx).is_none());
    }

    #[test]
    fn stale_todo_reminder_requires_open_entries() {
        let mut ctx = ReminderContext {
            todos: vec![TodoItem::new("a", TodoStatus::Completed)],
            turns_since_todo_update: TODO_STALE_TURNS + 1,
            ..Default::default()
        };
        assert!(todo_not_used_recently(&ctx).is_none(), "all completed");
        ctx.todos.push(TodoItem::new("b", TodoStatus::Pending));
        let message = todo_not_used_recently(&ctx).unwrap();
        assert!(message.contains("[pending] b"));
    }

    #[test]
    fn stale_todo_reminder_respects_threshold() {
        let ctx = ReminderContext {
            todos: vec![TodoItem::new("a", TodoStatus::Pending)],
            turns_since_todo_update: TODO_STALE_TURNS - 1,
            ..Default::default()
        };
        assert!(todo_not_used_recently(&ctx).is_none());
    }

    #[test]
    fn changed_files_are_listed() {
        let ctx = ReminderContext {
            changed_files: vec![PathBuf::from("/w/a.rs"), PathBuf::from("/w/b.rs")],
            ..Default::default()
        };
        let message = file_changed_externally(&ctx).unwrap();
        assert!(message.contains("- /w/a.rs"));
        assert!(message.contains("- /w/b.rs"));
        assert!(message.contains("Re-read them"));
    }

    #[test]
    fn fired_kinds_are_suppressed() {
        let reminders = main_agent_reminders();
        let ctx = ReminderContext { is_first_turn: true, ..Default::default() };
        let mut fired = HashSet::new();
        let first = run_reminders(&reminders, &ctx, &mut fired);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].reminder.as_deref(), Some("empty_todo"));
        let second = run_reminders(&reminders, &ctx, &mut fired);
        assert!(second.is_empty(), "kind fires at most once per task");
    }
}
