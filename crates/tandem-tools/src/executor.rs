// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Batch execution of one turn's tool calls.
//!
//! The executor validates arguments, dispatches each call (concurrently when
//! the provider hint allows), applies the truncation policy, and reports
//! lifecycle events through a channel.  Cancellation is two-sided: the
//! shared cancel flag interrupts cooperative tools, dropping the `run`
//! future aborts spawned ones, and [`ToolExecutor::cancel_pending`]
//! synthesizes `Interrupted` results for every call that never reported.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::debug;

use tandem_protocol::{TodoItem, ToolCallItem, ToolResultItem, ToolSideEffect};

use crate::context::ToolContext;
use crate::registry::ToolRegistry;
use crate::truncate;

#[derive(Debug, Clone)]
pub enum ToolExecutorEvent {
    CallStarted { call: ToolCallItem },
    CallFinished { call: ToolCallItem, result: ToolResultItem },
    TodoChanged { todos: Vec<TodoItem> },
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    ctx: ToolContext,
    calls: Vec<ToolCallItem>,
    completed: Arc<StdMutex<HashSet<String>>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, ctx: ToolContext) -> Self {
        Self {
            registry,
            ctx,
            calls: Vec::new(),
            completed: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    /// Run one batch.  `parallel` is the provider hint; a single call always
    /// runs inline.  Events stream through `tx` in lifecycle order per call.
    pub async fn run(
        &mut self,
        calls: Vec<ToolCallItem>,
        parallel: bool,
        tx: mpsc::Sender<ToolExecutorEvent>,
    ) {
        self.calls = calls.clone();
        debug!(count = calls.len(), parallel, "running tool batch");

        if parallel && calls.len() > 1 {
            // Concurrency is bounded by the batch itself; no global pool.
            let mut join = JoinSet::new();
            for call in calls {
                let registry = self.registry.clone();
                let ctx = self.ctx.clone();
                let completed = self.completed.clone();
                let tx = tx.clone();
                join.spawn(async move {
                    run_one(registry, ctx, call, completed, tx).await;
                });
            }
            while join.join_next().await.is_some() {}
        } else {
            for call in calls {
                if self.ctx.cancel.is_cancelled() {
                    // Remaining calls get synthetic results via
                    // `cancel_pending`.
                    break;
                }
                run_one(
                    self.registry.clone(),
                    self.ctx.clone(),
                    call,
                    self.completed.clone(),
                    tx.clone(),
                )
                .await;
            }
        }
    }

    /// Synthesize `Interrupted` results for every call that has not reported
    /// one.  Long-running tools that registered a partial report get their
    /// progress summary appended and their partial metadata attached.
    pub fn cancel_pending(&self) -> Vec<ToolExecutorEvent> {
        let completed = self.completed.lock().unwrap();
        self.calls
            .iter()
            .filter(|call| !completed.contains(&call.call_id))
            .map(|call| {
                let mut output = "Interrupted".to_string();
                let mut task_metadata = None;
                if let Some(report) = self.ctx.partial_reports.take(&call.call_id) {
                    if let Some(progress) = report.progress.and_then(|get| get()) {
                        output = format!("Interrupted\n\nPartial progress:\n{progress}");
                    }
                    task_metadata = report.metadata.and_then(|get| get());
                }
                let mut result = ToolResultItem::error(output);
                result.call_id = call.call_id.clone();
                result.tool_name = Some(call.name.clone());
                result.task_metadata = task_metadata;
                ToolExecutorEvent::CallFinished { call: call.clone(), result }
            })
            .collect()
    }
}

async fn run_one(
    registry: Arc<ToolRegistry>,
    ctx: ToolContext,
    call: ToolCallItem,
    completed: Arc<StdMutex<HashSet<String>>>,
    tx: mpsc::Sender<ToolExecutorEvent>,
) {
    let _ = tx.send(ToolExecutorEvent::CallStarted { call: call.clone() }).await;

    let mut result = execute_call(&registry, &ctx, &call).await;
    result.call_id = call.call_id.clone();
    result.tool_name = Some(call.name.clone());

    let exempt = registry
        .get(&call.name)
        .map(|t| t.exempt_from_truncation())
        .unwrap_or(false);
    if !exempt {
        truncate::truncate_result(&mut result, &ctx.truncation_dir, &call.call_id);
    }

    if result.side_effects.contains(&ToolSideEffect::TodoChange) {
        let todos = ctx.todos.lock().await.todos.clone();
        let _ = tx.send(ToolExecutorEvent::TodoChanged { todos }).await;
    }

    completed.lock().unwrap().insert(call.call_id.clone());
    let _ = tx.send(ToolExecutorEvent::CallFinished { call, result }).await;
}

async fn execute_call(
    registry: &ToolRegistry,
    ctx: &ToolContext,
    call: &ToolCallItem,
) -> ToolResultItem {
    // Some providers stream no fragments at all for empty argument objects.
    let arguments = if call.arguments.trim().is_empty() { "{}" } else { call.arguments.as_str() };
    if let Err(e) = serde_json::from_str::<serde_json::Value>(arguments) {
        return ToolResultItem::error(format!("Invalid arguments: {e}"));
    }
    let Some(tool) = registry.get(&call.name) else {
        return ToolResultItem::error(format!("Unknown tool: {}", call.name));
    };
    tool.call(call, ctx).await
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
