// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use tandem_protocol::{ToolCallItem, ToolResultItem, ToolResultUiExtra, ToolSchema};

use crate::context::ToolContext;
use crate::names::MULTI_EDIT;
use crate::tool::Tool;
use crate::tools::diff;
use crate::tools::edit::{apply_edit, validate_edit};

#[derive(Debug, Deserialize)]
struct SingleEdit {
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

#[derive(Debug, Deserialize)]
struct MultiEditArguments {
    file_path: String,
    edits: Vec<SingleEdit>,
}

pub struct MultiEditTool;

#[async_trait]
impl Tool for MultiEditTool {
    fn name(&self) -> &str {
        MULTI_EDIT
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: MULTI_EDIT.into(),
            description: "Makes multiple string replacements in a single file in one atomic \
                operation. Built on the Edit tool: each edit follows the same rules and they \
                are applied in sequence, each operating on the result of the previous one. \
                All edits are validated before any of them is written; if any edit fails, \
                none are applied. Prefer this over multiple Edit calls when changing several \
                places in the same file."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "The absolute path to the file to modify"
                    },
                    "edits": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": "object",
                            "properties": {
                                "old_string": { "type": "string" },
                                "new_string": { "type": "string" },
                                "replace_all": { "type": "boolean", "default": false }
                            },
                            "required": ["old_string", "new_string"],
                            "additionalProperties": false
                        },
                        "description": "The edits to apply in order"
                    }
                },
                "required": ["file_path", "edits"],
                "additionalProperties": false
            }),
        }
    }

    async fn call(&self, call: &ToolCallItem, ctx: &ToolContext) -> ToolResultItem {
        let args: MultiEditArguments = match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(e) => return ToolResultItem::error(format!("Invalid arguments: {e}")),
        };
        if args.edits.is_empty() {
            return ToolResultItem::error("<tool_use_error>No edits provided.</tool_use_error>");
        }
        let path = ctx.resolve_path(&args.file_path);

        let creating = args.edits[0].old_string.is_empty();
        let before = if creating {
            if path.exists() {
                return ToolResultItem::error(
                    "<tool_use_error>Cannot create new file - file already exists.</tool_use_error>",
                );
            }
            String::new()
        } else {
            if !path.exists() {
                return ToolResultItem::error(
                    crate::context::FreshnessError::NotRead.message(),
                );
            }
            if let Err(e) = ctx.file_tracker.lock().await.check_fresh(&path) {
                return ToolResultItem::error(e.message());
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    return ToolResultItem::error(format!("<tool_use_error>{e}</tool_use_error>"))
                }
            }
        };

        // Validate the whole sequence against in-memory content before
        // touching disk.
        let mut current = before.clone();
        for (index, edit) in args.edits.iter().enumerate() {
            if let Some(message) =
                validate_edit(&current, &edit.old_string, &edit.new_string, edit.replace_all)
            {
                return ToolResultItem::error(format!("Edit {} failed: {message}", index + 1));
            }
            current = apply_edit(&current, &edit.old_string, &edit.new_string, edit.replace_all);
        }

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResultItem::error(format!("<tool_use_error>{e}</tool_use_error>"));
            }
        }
        if let Err(e) = tokio::fs::write(&path, &current).await {
            return ToolResultItem::error(format!("<tool_use_error>{e}</tool_use_error>"));
        }
        let _ = ctx.file_tracker.lock().await.track(&path);

        let path_label = path.display().to_string();
        let diff_text = diff::unified_diff(&before, &current, &path_label, &path_label);
        let output = if creating {
            format!("File created successfully at: {path_label}")
        } else {
            format!(
                "Applied {} edit{} to {path_label}",
                args.edits.len(),
                if args.edits.len() == 1 { "" } else { "s" }
            )
        };
        ToolResultItem::success(output).with_ui_extra(ToolResultUiExtra::DiffText { diff_text })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
