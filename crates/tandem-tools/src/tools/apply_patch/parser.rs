// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Patch-envelope parsing and the Bash-disguise detection.
//!
//! The envelope is the `*** Begin Patch` format: `Add File`, `Delete File`,
//! and `Update File` sections, updates carrying `@@` hunks of
//! keep/remove/add lines and an optional `*** Move to:` rename.

use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct PatchError(pub String);

impl PatchError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HunkLine {
    Keep(String),
    Remove(String),
    Add(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Hunk {
    /// Optional location hint following `@@` (a function or class name).
    pub context_hint: Option<String>,
    pub lines: Vec<HunkLine>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileChange {
    Add { path: String, content: String },
    Delete { path: String },
    Update { path: String, move_to: Option<String>, hunks: Vec<Hunk> },
}

impl FileChange {
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Delete { path } | Self::Update { path, .. } => path,
        }
    }
}

/// Parse a full patch envelope into file changes.
pub fn parse_patch(text: &str) -> Result<Vec<FileChange>, PatchError> {
    let trimmed = text.trim_start();
    if !trimmed.starts_with("*** Begin Patch") {
        return Err(PatchError::new(
            "apply_patch content must start with *** Begin Patch",
        ));
    }

    let mut changes: Vec<FileChange> = Vec::new();
    let mut lines = trimmed.lines().skip(1).peekable();

    while let Some(line) = lines.next() {
        if line.starts_with("*** End Patch") {
            return Ok(changes);
        }
        if let Some(path) = line.strip_prefix("*** Add File: ") {
            let mut content = String::new();
            while let Some(next) = lines.peek() {
                if next.starts_with("*** ") {
                    break;
                }
                let body = lines.next().unwrap();
                let Some(added) = body.strip_prefix('+') else {
                    return Err(PatchError::new(format!(
                        "Invalid Add File line (must start with '+'): {body}"
                    )));
                };
                content.push_str(added);
                content.push('\n');
            }
            changes.push(FileChange::Add { path: path.trim().to_string(), content });
        } else if let Some(path) = line.strip_prefix("*** Delete File: ") {
            changes.push(FileChange::Delete { path: path.trim().to_string() });
        } else if let Some(path) = line.strip_prefix("*** Update File: ") {
            let mut move_to = None;
            if let Some(next) = lines.peek() {
                if let Some(target) = next.strip_prefix("*** Move to: ") {
                    move_to = Some(target.trim().to_string());
                    lines.next();
                }
            }
            let mut hunks: Vec<Hunk> = Vec::new();
            while let Some(next) = lines.peek() {
                if next.starts_with("*** End of File") {
                    lines.next();
                    continue;
                }
                if next.starts_with("*** ") {
                    break;
                }
                let body = lines.next().unwrap();
                if let Some(hint) = body.strip_prefix("@@") {
                    let hint = hint.trim();
                    hunks.push(Hunk {
                        context_hint: if hint.is_empty() { None } else { Some(hint.to_string()) },
                        lines: Vec::new(),
                    });
                    continue;
                }
                if hunks.is_empty() {
                    hunks.push(Hunk::default());
                }
                let hunk = hunks.last_mut().unwrap();
                if let Some(added) = body.strip_prefix('+') {
                    hunk.lines.push(HunkLine::Add(added.to_string()));
                } else if let Some(removed) = body.strip_prefix('-') {
                    hunk.lines.push(HunkLine::Remove(removed.to_string()));
                } else if let Some(kept) = body.strip_prefix(' ') {
                    hunk.lines.push(HunkLine::Keep(kept.to_string()));
                } else if body.is_empty() {
                    hunk.lines.push(HunkLine::Keep(String::new()));
                } else {
                    return Err(PatchError::new(format!("Invalid hunk line: {body}")));
                }
            }
            if hunks.iter().all(|h| h.lines.is_empty()) {
                return Err(PatchError::new(format!("Update File has no hunks: {path}")));
            }
            changes.push(FileChange::Update {
                path: path.trim().to_string(),
                move_to,
                hunks,
            });
        } else if line.trim().is_empty() {
            continue;
        } else {
            return Err(PatchError::new(format!("Unexpected patch line: {line}")));
        }
    }
    Err(PatchError::new("Patch is missing *** End Patch"))
}

/// Apply an update's hunks to the original file content.
pub fn apply_update(original: &str, hunks: &[Hunk], path: &str) -> Result<String, PatchError> {
    let orig_lines: Vec<&str> = original.lines().collect();
    let mut out: Vec<String> = Vec::new();
    let mut pos = 0usize;

    for hunk in hunks {
        let pattern: Vec<&str> = hunk
            .lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Keep(s) | HunkLine::Remove(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect();
        let found = find_sequence(&orig_lines, pos, &pattern).ok_or_else(|| {
            PatchError::new(format!(
                "Failed to find patch context in {path}:\n{}",
                pattern.join("\n")
            ))
        })?;
        out.extend(orig_lines[pos..found].iter().map(|s| s.to_string()));
        let mut cursor = found;
        for line in &hunk.lines {
            match line {
                HunkLine::Keep(s) => {
                    out.push(s.clone());
                    cursor += 1;
                }
                HunkLine::Remove(_) => cursor += 1,
                HunkLine::Add(s) => out.push(s.clone()),
            }
        }
        pos = cursor;
    }
    out.extend(orig_lines[pos..].iter().map(|s| s.to_string()));

    let mut result = out.join("\n");
    if !result.is_empty() {
        result.push('\n');
    }
    Ok(result)
}

fn find_sequence(haystack: &[&str], from: usize, needle: &[&str]) -> Option<usize> {
    if needle.is_empty() {
        return Some(from);
    }
    if haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len())
        .find(|&start| haystack[start..start + needle.len()] == *needle)
}

// ─── Bash-disguise detection ──────────────────────────────────────────────────

/// Best-effort detection of `apply_patch` invocations routed through the
/// Bash tool.  Exactly four shapes are recognized: direct content, quoted
/// content, a heredoc, and a `cd <path> && apply_patch` heredoc.  Anything
/// else falls through to plain Bash execution.
pub fn extract_apply_patch_command(command: &str) -> Option<String> {
    let trimmed = command.trim();
    if let Some(rest) = trimmed.strip_prefix("cd ") {
        let (_, after_and) = rest.split_once("&&")?;
        return extract_direct(after_and.trim_start());
    }
    extract_direct(trimmed)
}

fn extract_direct(s: &str) -> Option<String> {
    let rest = s
        .strip_prefix("apply_patch")
        .or_else(|| s.strip_prefix("applypatch"))?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start();

    if rest.starts_with("<<") {
        return extract_heredoc(rest);
    }
    for quote in ['\'', '"'] {
        if let Some(inner) = rest.strip_prefix(quote) {
            if let Some(body) = inner.strip_suffix(quote) {
                return Some(body.to_string());
            }
        }
    }
    Some(rest.to_string())
}

fn extract_heredoc(s: &str) -> Option<String> {
    let rest = s.strip_prefix("<<")?.trim_start();
    let (delimiter, rest) = if let Some(quoted) = rest.strip_prefix('\'') {
        let end = quoted.find('\'')?;
        (quoted[..end].to_string(), &quoted[end + 1..])
    } else {
        let end = rest.find('\n')?;
        (rest[..end].trim().to_string(), &rest[end..])
    };
    let newline = rest.find('\n')?;
    let body = &rest[newline + 1..];

    let mut lines: Vec<&str> = body.split('\n').collect();
    while matches!(lines.last(), Some(l) if l.trim().is_empty()) {
        lines.pop();
    }
    if lines.last()?.trim() != delimiter {
        return None;
    }
    lines.pop();
    Some(lines.join("\n"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
