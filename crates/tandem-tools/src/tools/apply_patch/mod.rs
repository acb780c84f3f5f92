// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The `apply_patch` tool: multi-file add/delete/update in one envelope.
//!
//! All paths are workspace-relative; absolute paths and escapes are
//! rejected.  Changes are computed fully in memory before anything touches
//! disk, so a failed patch writes nothing.

pub mod parser;

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use tandem_protocol::{ToolCallItem, ToolResultItem, ToolResultUiExtra, ToolSchema};

use crate::context::ToolContext;
use crate::names::APPLY_PATCH;
use crate::tool::Tool;
use crate::tools::diff;

use parser::{apply_update, parse_patch, FileChange, PatchError};

#[derive(Debug, Deserialize)]
struct ApplyPatchArguments {
    input: String,
}

/// One fully-resolved, validated change ready to commit.
enum PlannedChange {
    Add { path: PathBuf, content: String },
    Delete { path: PathBuf, old_content: String },
    Update { path: PathBuf, move_to: Option<PathBuf>, old_content: String, new_content: String },
}

fn resolve_in_workspace(work_dir: &Path, path: &str) -> Result<PathBuf, PatchError> {
    let p = Path::new(path);
    if p.is_absolute() {
        return Err(PatchError(format!("Absolute path not allowed: {path}")));
    }
    let mut resolved = work_dir.to_path_buf();
    for component in p.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() || !resolved.starts_with(work_dir) {
                    return Err(PatchError(format!("Path escapes workspace: {path}")));
                }
            }
            _ => return Err(PatchError(format!("Path escapes workspace: {path}"))),
        }
    }
    if !resolved.starts_with(work_dir) {
        return Err(PatchError(format!("Path escapes workspace: {path}")));
    }
    Ok(resolved)
}

fn render_change_diff(change: &PlannedChange, work_dir: &Path) -> String {
    let rel = |p: &Path| {
        p.strip_prefix(work_dir)
            .unwrap_or(p)
            .display()
            .to_string()
    };
    match change {
        PlannedChange::Add { path, content } => {
            let name = rel(path);
            format!(
                "diff --git a/{name} b/{name}\nnew file mode 100644\n{}",
                diff::unified_diff("", content, "/dev/null", &format!("b/{name}"))
            )
        }
        PlannedChange::Delete { path, old_content } => {
            let name = rel(path);
            format!(
                "diff --git a/{name} b/{name}\ndeleted file mode 100644\n{}",
                diff::unified_diff(old_content, "", &format!("a/{name}"), "/dev/null")
            )
        }
        PlannedChange::Update { path, move_to, old_content, new_content } => {
            let from = rel(path);
            let to = move_to.as_ref().map(|p| rel(p)).unwrap_or_else(|| from.clone());
            let mut header = format!("diff --git a/{from} b/{to}");
            if to != from {
                header.push_str(&format!("\nrename from {from}\nrename to {to}"));
            }
            format!(
                "{header}\n{}",
                diff::unified_diff(
                    old_content,
                    new_content,
                    &format!("a/{from}"),
                    &format!("b/{to}")
                )
            )
        }
    }
}

/// Parse and apply a patch envelope against the workspace.  Used by the
/// tool itself and by the Bash reroute.
pub async fn handle_apply_patch(patch_text: &str, ctx: &ToolContext) -> ToolResultItem {
    match run_patch(patch_text, ctx).await {
        Ok((output, diff_text)) => ToolResultItem::success(output)
            .with_ui_extra(ToolResultUiExtra::DiffText { diff_text }),
        Err(e) => ToolResultItem::error(e.0),
    }
}

async fn run_patch(patch_text: &str, ctx: &ToolContext) -> Result<(String, String), PatchError> {
    let changes = parse_patch(patch_text)?;
    let work_dir = &ctx.work_dir;

    // Plan phase: resolve paths, read originals, compute new contents.
    let mut planned: Vec<PlannedChange> = Vec::new();
    for change in &changes {
        let resolved = resolve_in_workspace(work_dir, change.path())?;
        if resolved.is_dir() {
            return Err(PatchError(format!(
                "Cannot apply patch to directory: {}",
                change.path()
            )));
        }
        match change {
            FileChange::Add { path, content } => {
                if resolved.exists() {
                    return Err(PatchError(format!("Add File Error: File already exists: {path}")));
                }
                planned.push(PlannedChange::Add { path: resolved, content: content.clone() });
            }
            FileChange::Delete { path } => {
                let old_content = tokio::fs::read_to_string(&resolved)
                    .await
                    .map_err(|_| PatchError(format!("Missing File: {path}")))?;
                planned.push(PlannedChange::Delete { path: resolved, old_content });
            }
            FileChange::Update { path, move_to, hunks } => {
                let old_content = tokio::fs::read_to_string(&resolved)
                    .await
                    .map_err(|_| PatchError(format!("Missing File: {path}")))?;
                let new_content = apply_update(&old_content, hunks, path)?;
                let move_target = match move_to {
                    Some(target) => Some(resolve_in_workspace(work_dir, target)?),
                    None => None,
                };
                planned.push(PlannedChange::Update {
                    path: resolved,
                    move_to: move_target,
                    old_content,
                    new_content,
                });
            }
        }
    }

    let diff_text = planned
        .iter()
        .map(|c| render_change_diff(c, work_dir))
        .collect::<Vec<_>>()
        .join("\n\n");

    // Commit phase: all validation passed, now write.
    let mut tracker = ctx.file_tracker.lock().await;
    for change in &planned {
        match change {
            PlannedChange::Add { path, content } => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| PatchError(format!("Failed to create {}: {e}", path.display())))?;
                }
                tokio::fs::write(path, content)
                    .await
                    .map_err(|e| PatchError(format!("Failed to write {}: {e}", path.display())))?;
                let _ = tracker.track(path);
            }
            PlannedChange::Delete { path, .. } => {
                tokio::fs::remove_file(path)
                    .await
                    .map_err(|e| PatchError(format!("Failed to delete {}: {e}", path.display())))?;
                tracker.forget(path);
            }
            PlannedChange::Update { path, move_to, new_content, .. } => {
                let target = move_to.as_ref().unwrap_or(path);
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| PatchError(format!("Failed to create {}: {e}", target.display())))?;
                }
                tokio::fs::write(target, new_content)
                    .await
                    .map_err(|e| PatchError(format!("Failed to write {}: {e}", target.display())))?;
                if target != path {
                    tokio::fs::remove_file(path)
                        .await
                        .map_err(|e| PatchError(format!("Failed to move {}: {e}", path.display())))?;
                    tracker.forget(path);
                }
                let _ = tracker.track(target);
            }
        }
    }

    Ok(("Done!".to_string(), diff_text))
}

pub struct ApplyPatchTool;

#[async_trait]
impl Tool for ApplyPatchTool {
    fn name(&self) -> &str {
        APPLY_PATCH
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: APPLY_PATCH.into(),
            description: "Applies a patch to one or more files in the workspace. The patch \
                must start with `*** Begin Patch` and end with `*** End Patch`, containing \
                `*** Add File:`, `*** Delete File:`, or `*** Update File:` sections. Update \
                sections hold `@@` hunks whose lines begin with ' ' (context), '-' (remove), \
                or '+' (add); an optional `*** Move to:` line renames the file. All paths are \
                relative to the workspace root."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "input": {
                        "type": "string",
                        "description": "The full patch envelope to apply"
                    }
                },
                "required": ["input"],
                "additionalProperties": false
            }),
        }
    }

    async fn call(&self, call: &ToolCallItem, ctx: &ToolContext) -> ToolResultItem {
        let args: ApplyPatchArguments = match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(e) => return ToolResultItem::error(format!("Invalid arguments: {e}")),
        };
        handle_apply_patch(&args.input, ctx).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_protocol::ToolStatus;

    fn ctx(dir: &Path) -> ToolContext {
        ToolContext::new("s1", dir)
    }

    fn patch_call(patch: &str) -> ToolCallItem {
        ToolCallItem::new("c1", APPLY_PATCH, json!({ "input": patch }).to_string(), None)
    }

    #[tokio::test]
    async fn add_file_creates_and_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let patch = "*** Begin Patch\n*** Add File: docs/notes.txt\n+hello\n+world\n*** End Patch";
        let result = ApplyPatchTool.call(&patch_call(patch), &ctx).await;
        assert_eq!(result.status, ToolStatus::Success, "{:?}", result.output);
        assert_eq!(result.output.as_deref(), Some("Done!"));
        let created = dir.path().join("docs/notes.txt");
        assert_eq!(std::fs::read_to_string(&created).unwrap(), "hello\nworld\n");
        assert!(ctx.file_tracker.lock().await.contains(&created));
        match result.ui_extra {
            Some(ToolResultUiExtra::DiffText { diff_text }) => {
                assert!(diff_text.contains("new file mode 100644"));
                assert!(diff_text.contains("+hello"));
            }
            other => panic!("expected diff, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_file_applies_hunks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {\n    old();\n}\n").unwrap();
        let ctx = ctx(dir.path());
        let patch = "*** Begin Patch\n\
                     *** Update File: main.rs\n\
                     @@ fn main\n\
                     \x20fn main() {\n\
                     -    old();\n\
                     +    new();\n\
                     \x20}\n\
                     *** End Patch";
        let result = ApplyPatchTool.call(&patch_call(patch), &ctx).await;
        assert_eq!(result.status, ToolStatus::Success, "{:?}", result.output);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("main.rs")).unwrap(),
            "fn main() {\n    new();\n}\n"
        );
    }

    #[tokio::test]
    async fn update_with_move_renames_and_retracks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.txt"), "content\n").unwrap();
        let ctx = ctx(dir.path());
        let patch = "*** Begin Patch\n\
                     *** Update File: old.txt\n\
                     *** Move to: new.txt\n\
                     -content\n\
                     +CONTENT\n\
                     *** End Patch";
        let result = ApplyPatchTool.call(&patch_call(patch), &ctx).await;
        assert_eq!(result.status, ToolStatus::Success, "{:?}", result.output);
        assert!(!dir.path().join("old.txt").exists());
        assert_eq!(std::fs::read_to_string(dir.path().join("new.txt")).unwrap(), "CONTENT\n");
        let tracker = ctx.file_tracker.lock().await;
        assert!(tracker.contains(&dir.path().join("new.txt")));
        assert!(!tracker.contains(&dir.path().join("old.txt")));
    }

    #[tokio::test]
    async fn delete_file_removes_and_forgets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.txt");
        std::fs::write(&path, "bye\n").unwrap();
        let ctx = ctx(dir.path());
        ctx.file_tracker.lock().await.track(&path).unwrap();
        let patch = "*** Begin Patch\n*** Delete File: gone.txt\n*** End Patch";
        let result = ApplyPatchTool.call(&patch_call(patch), &ctx).await;
        assert_eq!(result.status, ToolStatus::Success);
        assert!(!path.exists());
        assert!(!ctx.file_tracker.lock().await.contains(&path));
    }

    #[tokio::test]
    async fn absolute_path_is_rejected_and_nothing_written() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let patch = "*** Begin Patch\n*** Add File: /etc/evil.txt\n+x\n*** End Patch";
        let result = ApplyPatchTool.call(&patch_call(patch), &ctx).await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result
            .output
            .unwrap()
            .contains("Absolute path not allowed: /etc/evil.txt"));
    }

    #[tokio::test]
    async fn escaping_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let patch = "*** Begin Patch\n*** Add File: ../outside.txt\n+x\n*** End Patch";
        let result = ApplyPatchTool.call(&patch_call(patch), &ctx).await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.output.unwrap().contains("Path escapes workspace"));
    }

    #[tokio::test]
    async fn failed_context_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "original\n").unwrap();
        let ctx = ctx(dir.path());
        let patch = "*** Begin Patch\n\
                     *** Add File: b.txt\n\
                     +new file\n\
                     *** Update File: a.txt\n\
                     -nonexistent line\n\
                     +replacement\n\
                     *** End Patch";
        let result = ApplyPatchTool.call(&patch_call(patch), &ctx).await;
        assert_eq!(result.status, ToolStatus::Error);
        // The valid Add earlier in the envelope must not have committed.
        assert!(!dir.path().join("b.txt").exists());
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "original\n");
    }

    #[tokio::test]
    async fn missing_update_target_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let patch = "*** Begin Patch\n*** Update File: ghost.txt\n-x\n+y\n*** End Patch";
        let result = ApplyPatchTool.call(&patch_call(patch), &ctx).await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.output.unwrap().contains("Missing File: ghost.txt"));
    }
}
