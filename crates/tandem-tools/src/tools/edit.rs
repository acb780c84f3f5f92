// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use tandem_protocol::{ToolCallItem, ToolResultItem, ToolResultUiExtra, ToolSchema};

use crate::context::ToolContext;
use crate::names::EDIT;
use crate::tool::Tool;
use crate::tools::diff;

#[derive(Debug, Deserialize)]
pub(crate) struct EditArguments {
    pub file_path: String,
    pub old_string: String,
    pub new_string: String,
    #[serde(default)]
    pub replace_all: bool,
}

/// Validate one replacement against the current content.  Returns the
/// user-visible error message on failure.  Shared with `MultiEdit`.
pub(crate) fn validate_edit(
    content: &str,
    old_string: &str,
    new_string: &str,
    replace_all: bool,
) -> Option<String> {
    if old_string == new_string {
        return Some(
            "<tool_use_error>No changes to make: old_string and new_string are exactly the same.</tool_use_error>"
                .into(),
        );
    }
    if old_string.is_empty() {
        // Creation case; validated at call level.
        return None;
    }
    let count = content.matches(old_string).count();
    if count == 0 {
        return Some(format!(
            "<tool_use_error>String to replace not found in file.\nString: {old_string}</tool_use_error>"
        ));
    }
    if !replace_all && count > 1 {
        return Some(format!(
            "<tool_use_error>Found {count} matches of the string to replace, but replace_all is false. \
             To replace all occurrences, set replace_all to true. To replace only one occurrence, \
             please provide more context to uniquely identify the instance.\n\
             String: {old_string}</tool_use_error>"
        ));
    }
    None
}

/// Apply one already-validated replacement.  Shared with `MultiEdit`.
pub(crate) fn apply_edit(
    content: &str,
    old_string: &str,
    new_string: &str,
    replace_all: bool,
) -> String {
    if old_string.is_empty() {
        return new_string.to_string();
    }
    if replace_all {
        content.replace(old_string, new_string)
    } else {
        content.replacen(old_string, new_string, 1)
    }
}

pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        EDIT
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: EDIT.into(),
            description: "Performs exact string replacements in files.\n\n\
                Usage:\n\
                - You must use your `Read` tool at least once in the conversation before editing. \
                This tool will error if you attempt an edit without reading the file.\n\
                - When editing text from Read tool output, ensure you preserve the exact \
                indentation (tabs/spaces) as it appears AFTER the line number prefix. Never \
                include any part of the line number prefix in the old_string or new_string.\n\
                - The edit will FAIL if `old_string` is not unique in the file. Either provide \
                a larger string with more surrounding context to make it unique or use \
                `replace_all` to change every instance of `old_string`.\n\
                - You can use this tool to create new files by providing an empty old_string."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "The absolute path to the file to modify"
                    },
                    "old_string": {
                        "type": "string",
                        "description": "The text to replace"
                    },
                    "new_string": {
                        "type": "string",
                        "description": "The text to replace it with (must be different from old_string)"
                    },
                    "replace_all": {
                        "type": "boolean",
                        "default": false,
                        "description": "Replace all occurences of old_string (default false)"
                    }
                },
                "required": ["file_path", "old_string", "new_string"],
                "additionalProperties": false
            }),
        }
    }

    async fn call(&self, call: &ToolCallItem, ctx: &ToolContext) -> ToolResultItem {
        let args: EditArguments = match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(e) => return ToolResultItem::error(format!("Invalid arguments: {e}")),
        };
        let path = ctx.resolve_path(&args.file_path);

        if path.is_dir() {
            return ToolResultItem::error(
                "<tool_use_error>Illegal operation on a directory. edit</tool_use_error>",
            );
        }

        // Creation: empty old_string targets a new or empty file.
        if args.old_string.is_empty() {
            if path.exists() {
                match tokio::fs::read_to_string(&path).await {
                    Ok(existing) if !existing.trim().is_empty() => {
                        return ToolResultItem::error(
                            "<tool_use_error>Cannot create new file - file already exists.</tool_use_error>",
                        );
                    }
                    Ok(_) => {}
                    Err(_) => {
                        return ToolResultItem::error(
                            "<tool_use_error>Cannot read existing file to check if it's empty.</tool_use_error>",
                        );
                    }
                }
            }
            let existed = path.exists();
            if let Some(parent) = path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolResultItem::error(format!("<tool_use_error>{e}</tool_use_error>"));
                }
            }
            if let Err(e) = tokio::fs::write(&path, &args.new_string).await {
                return ToolResultItem::error(format!("<tool_use_error>{e}</tool_use_error>"));
            }
            let _ = ctx.file_tracker.lock().await.track(&path);
            let message = if existed {
                format!("Empty file overwritten successfully at: {}", path.display())
            } else {
                format!("File created successfully at: {}", path.display())
            };
            return ToolResultItem::success(message);
        }

        // Editing an existing file requires a fresh read.
        if !path.exists() {
            return ToolResultItem::error(
                crate::context::FreshnessError::NotRead.message(),
            );
        }
        if let Err(e) = ctx.file_tracker.lock().await.check_fresh(&path) {
            return ToolResultItem::error(e.message());
        }

        let before = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => return ToolResultItem::error(format!("<tool_use_error>{e}</tool_use_error>")),
        };
        if let Some(message) =
            validate_edit(&before, &args.old_string, &args.new_string, args.replace_all)
        {
            return ToolResultItem::error(message);
        }
        let after = apply_edit(&before, &args.old_string, &args.new_string, args.replace_all);

        if let Err(e) = tokio::fs::write(&path, &after).await {
            return ToolResultItem::error(format!("<tool_use_error>{e}</tool_use_error>"));
        }
        let _ = ctx.file_tracker.lock().await.track(&path);

        let path_label = path.display().to_string();
        let diff_text = diff::unified_diff(&before, &after, &path_label, &path_label);
        let ui_extra = ToolResultUiExtra::DiffText { diff_text: diff_text.clone() };

        let output = if args.replace_all {
            format!(
                "The file {path_label} has been updated. All occurrences of '{}' were successfully replaced with '{}'.",
                args.old_string, args.new_string
            )
        } else {
            let snippet = diff::numbered_snippet(&after, &diff::changed_line_numbers(&diff_text));
            format!(
                "The file {path_label} has been updated. Here's the result of running `cat -n` \
                 on a snippet of the edited file:\n{snippet}"
            )
        };
        ToolResultItem::success(output).with_ui_extra(ui_extra)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
