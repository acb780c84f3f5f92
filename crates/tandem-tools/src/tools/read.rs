// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use tandem_protocol::{ToolCallItem, ToolResultItem, ToolSchema};

use crate::context::ToolContext;
use crate::names::READ;
use crate::tool::Tool;

/// Default number of lines returned when no limit is given.
const DEFAULT_LINE_LIMIT: usize = 2000;
/// Individual lines longer than this are cut.
const MAX_LINE_CHARS: usize = 2000;

#[derive(Debug, Deserialize)]
struct ReadArguments {
    file_path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        READ
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: READ.into(),
            description: "Reads a file from the local filesystem. \
                The file_path parameter must be an absolute path. \
                By default reads up to 2000 lines starting from the beginning of the file; \
                use offset and limit for longer files. \
                Output is returned in cat -n format, with line numbers starting at 1."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "The absolute path to the file to read"
                    },
                    "offset": {
                        "type": "number",
                        "description": "The line number to start reading from (1-based)"
                    },
                    "limit": {
                        "type": "number",
                        "description": "The number of lines to read"
                    }
                },
                "required": ["file_path"],
                "additionalProperties": false
            }),
        }
    }

    // Read enforces its own line limits.
    fn exempt_from_truncation(&self) -> bool {
        true
    }

    async fn call(&self, call: &ToolCallItem, ctx: &ToolContext) -> ToolResultItem {
        let args: ReadArguments = match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(e) => return ToolResultItem::error(format!("Invalid arguments: {e}")),
        };
        let path = ctx.resolve_path(&args.file_path);

        if path.is_dir() {
            return ToolResultItem::error(
                "<tool_use_error>Illegal operation on a directory. read</tool_use_error>",
            );
        }
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ToolResultItem::error(format!(
                    "<tool_use_error>File does not exist: {}</tool_use_error>",
                    path.display()
                ));
            }
            Err(e) => return ToolResultItem::error(format!("<tool_use_error>{e}</tool_use_error>")),
        };

        {
            let mut tracker = ctx.file_tracker.lock().await;
            if let Err(e) = tracker.track(&path) {
                return ToolResultItem::error(format!("<tool_use_error>{e}</tool_use_error>"));
            }
        }

        if content.is_empty() {
            return ToolResultItem::success(
                "<system-reminder>File is empty.</system-reminder>",
            );
        }

        let lines: Vec<&str> = content.lines().collect();
        let offset = args.offset.unwrap_or(1).max(1);
        if offset > lines.len() {
            return ToolResultItem::error(format!(
                "<tool_use_error>Offset {offset} is past the end of the file ({} lines)</tool_use_error>",
                lines.len()
            ));
        }
        let limit = args.limit.unwrap_or(DEFAULT_LINE_LIMIT);
        let end = (offset - 1 + limit).min(lines.len());

        let mut numbered = String::new();
        for (index, line) in lines[offset - 1..end].iter().enumerate() {
            let display: String = if line.chars().count() > MAX_LINE_CHARS {
                line.chars().take(MAX_LINE_CHARS).collect()
            } else {
                (*line).to_string()
            };
            numbered.push_str(&format!("{:>6}\t{}\n", offset + index, display));
        }
        if end < lines.len() {
            numbered.push_str(&format!(
                "\n(File has more lines. Use 'offset' parameter to read beyond line {end})",
            ));
        }
        ToolResultItem::success(numbered)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_protocol::ToolStatus;

    fn ctx(dir: &std::path::Path) -> ToolContext {
        ToolContext::new("s1", dir)
    }

    fn call_args(args: serde_json::Value) -> ToolCallItem {
        ToolCallItem::new("c1", READ, args.to_string(), None)
    }

    #[tokio::test]
    async fn reads_numbered_lines_and_tracks_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "first\nsecond\nthird\n").unwrap();
        let ctx = ctx(dir.path());
        let result = ReadTool
            .call(&call_args(json!({"file_path": path.to_str().unwrap()})), &ctx)
            .await;
        assert_eq!(result.status, ToolStatus::Success);
        let output = result.output.unwrap();
        assert!(output.contains(&format!("{:>6}\tfirst", 1)));
        assert!(output.contains(&format!("{:>6}\tthird", 3)));
        assert!(ctx.file_tracker.lock().await.contains(&path));
    }

    #[tokio::test]
    async fn offset_and_limit_select_a_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "l1\nl2\nl3\nl4\nl5\n").unwrap();
        let result = ReadTool
            .call(
                &call_args(json!({
                    "file_path": path.to_str().unwrap(),
                    "offset": 2,
                    "limit": 2
                })),
                &ctx(dir.path()),
            )
            .await;
        let output = result.output.unwrap();
        assert!(output.contains("l2"));
        assert!(output.contains("l3"));
        assert!(!output.contains("l4\n"), "{output}");
        assert!(output.contains("read beyond line 3"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ReadTool
            .call(&call_args(json!({"file_path": "/definitely/not/here"})), &ctx(dir.path()))
            .await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.output.unwrap().contains("File does not exist"));
    }

    #[tokio::test]
    async fn directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = ReadTool
            .call(
                &call_args(json!({"file_path": dir.path().to_str().unwrap()})),
                &ctx(dir.path()),
            )
            .await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.output.unwrap().contains("directory"));
    }

    #[tokio::test]
    async fn empty_file_reports_reminder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "").unwrap();
        let result = ReadTool
            .call(&call_args(json!({"file_path": path.to_str().unwrap()})), &ctx(dir.path()))
            .await;
        assert_eq!(result.status, ToolStatus::Success);
        assert!(result.output.unwrap().contains("File is empty"));
    }

    #[tokio::test]
    async fn offset_past_eof_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "one\n").unwrap();
        let result = ReadTool
            .call(
                &call_args(json!({"file_path": path.to_str().unwrap(), "offset": 10})),
                &ctx(dir.path()),
            )
            .await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.output.unwrap().contains("past the end"));
    }
}
