// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use tandem_protocol::{ToolCallItem, ToolResultItem, ToolResultUiExtra, ToolSchema};

use crate::context::ToolContext;
use crate::names::WRITE;
use crate::tool::Tool;
use crate::tools::diff;

#[derive(Debug, Deserialize)]
struct WriteArguments {
    file_path: String,
    content: String,
}

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        WRITE
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: WRITE.into(),
            description: "Writes a file to the local filesystem, overwriting it if it exists.\n\n\
                Usage:\n\
                - The file_path parameter must be an absolute path.\n\
                - To overwrite an existing file you must have read it with the Read tool first. \
                This tool will error if you attempt to overwrite a file without reading it.\n\
                - ALWAYS prefer editing existing files. NEVER write new files unless explicitly required."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "The absolute path to the file to write"
                    },
                    "content": {
                        "type": "string",
                        "description": "The content to write to the file"
                    }
                },
                "required": ["file_path", "content"],
                "additionalProperties": false
            }),
        }
    }

    async fn call(&self, call: &ToolCallItem, ctx: &ToolContext) -> ToolResultItem {
        let args: WriteArguments = match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(e) => return ToolResultItem::error(format!("Invalid arguments: {e}")),
        };
        let path = ctx.resolve_path(&args.file_path);

        if path.is_dir() {
            return ToolResultItem::error(
                "<tool_use_error>Illegal operation on a directory. write</tool_use_error>",
            );
        }

        let existed = path.exists();
        let before = if existed {
            if let Err(e) = ctx.file_tracker.lock().await.check_fresh(&path) {
                return ToolResultItem::error(e.message());
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    return ToolResultItem::error(format!("<tool_use_error>{e}</tool_use_error>"))
                }
            }
        } else {
            String::new()
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResultItem::error(format!("<tool_use_error>{e}</tool_use_error>"));
            }
        }
        if let Err(e) = tokio::fs::write(&path, &args.content).await {
            return ToolResultItem::error(format!("<tool_use_error>{e}</tool_use_error>"));
        }
        let _ = ctx.file_tracker.lock().await.track(&path);

        let path_label = path.display().to_string();
        if existed {
            let diff_text = diff::unified_diff(&before, &args.content, &path_label, &path_label);
            ToolResultItem::success(format!("The file {path_label} has been updated."))
                .with_ui_extra(ToolResultUiExtra::DiffText { diff_text })
        } else {
            ToolResultItem::success(format!("File created successfully at: {path_label}"))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
