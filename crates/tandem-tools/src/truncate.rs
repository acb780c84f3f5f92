// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool-output truncation policy.
//!
//! Outputs past [`MAX_TOOL_OUTPUT_CHARS`] keep a head and a tail with an
//! omission marker between them; the full text is written to the session's
//! truncation directory keyed by the tool call id so a later tool (`rg` in a
//! sub-agent, typically) can search the whole thing.

use std::path::{Path, PathBuf};

use tracing::warn;

use tandem_protocol::{ToolResultItem, ToolResultUiExtra, TruncationInfo};

pub const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;
pub const TRUNCATION_HEAD_CHARS: usize = 10_000;
pub const TRUNCATION_TAIL_CHARS: usize = 15_000;

/// Make an identifier safe to use as a file name (`WebFetch` uses URLs).
pub fn sanitize_identifier(identifier: &str) -> String {
    let cleaned: String = identifier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    cleaned.chars().take(120).collect()
}

fn char_slice(s: &str, range: std::ops::Range<usize>) -> &str {
    let mut indices = s.char_indices().map(|(i, _)| i);
    let start = indices.nth(range.start).unwrap_or(s.len());
    let end = if range.end >= s.chars().count() {
        s.len()
    } else {
        s.char_indices().map(|(i, _)| i).nth(range.end).unwrap_or(s.len())
    };
    &s[start..end]
}

/// Apply the smart head/tail strategy to a tool result in place.
///
/// No-op for outputs within the limit.  On truncation the result text gains
/// an omission marker plus a pointer to the saved file, and `ui_extra`
/// records the truncation unless the tool already attached render hints.
pub fn truncate_result(result: &mut ToolResultItem, truncation_dir: &Path, identifier: &str) {
    let Some(output) = result.output.as_ref() else { return };
    let total_chars = output.chars().count();
    if total_chars <= MAX_TOOL_OUTPUT_CHARS {
        return;
    }

    let saved_path = save_full_output(output, truncation_dir, identifier);

    let head = char_slice(output, 0..TRUNCATION_HEAD_CHARS);
    let tail = char_slice(output, total_chars - TRUNCATION_TAIL_CHARS..total_chars);
    let omitted = total_chars - TRUNCATION_HEAD_CHARS - TRUNCATION_TAIL_CHARS;

    let mut truncated = format!("{head}\n--- {omitted} characters omitted ---\n{tail}");
    if let Some(path) = &saved_path {
        truncated.push_str(&format!(
            "\n\nFull output saved to: {} (search it with rg instead of re-running)",
            path.display()
        ));
    }

    let truncated_chars = truncated.chars().count();
    result.output = Some(truncated);
    if result.ui_extra.is_none() {
        if let Some(path) = saved_path {
            result.ui_extra = Some(ToolResultUiExtra::Truncation(TruncationInfo {
                saved_file_path: path.display().to_string(),
                original_length: total_chars,
                truncated_length: truncated_chars,
            }));
        }
    }
}

fn save_full_output(output: &str, truncation_dir: &Path, identifier: &str) -> Option<PathBuf> {
    let file_name = format!("{}.txt", sanitize_identifier(identifier));
    let path = truncation_dir.join(file_name);
    if let Err(e) = std::fs::create_dir_all(truncation_dir) {
        warn!(dir = %truncation_dir.display(), error = %e, "cannot create truncation dir");
        return None;
    }
    match std::fs::write(&path, output) {
        Ok(()) => Some(path),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot save full tool output");
            None
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
