// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Unified-diff helpers shared by the edit tools.

use similar::TextDiff;

/// Standard 3-context-line unified diff between two file versions.
pub fn unified_diff(before: &str, after: &str, from_label: &str, to_label: &str) -> String {
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(3)
        .header(from_label, to_label)
        .to_string()
}

/// Line numbers (1-based, in the new content) that a rendered unified diff
/// touches: kept context and added lines, the window an edit snippet shows.
pub fn changed_line_numbers(diff_text: &str) -> Vec<usize> {
    let mut line_numbers = Vec::new();
    let mut after_line = 0usize;
    for line in diff_text.lines() {
        if line.starts_with("@@") {
            // Hunk header: @@ -l,s +l,s @@
            if let Some(plus) = line.split('+').nth(1) {
                let range = plus.split(' ').next().unwrap_or("");
                let start = range.split(',').next().unwrap_or("0");
                after_line = start.parse::<usize>().unwrap_or(1).saturating_sub(1);
            }
            continue;
        }
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        match line.as_bytes().first() {
            Some(b' ') | Some(b'+') => {
                after_line += 1;
                line_numbers.push(after_line);
            }
            _ => {}
        }
    }
    line_numbers
}

/// `cat -n`-style snippet of `content` restricted to the given line numbers.
pub fn numbered_snippet(content: &str, line_numbers: &[usize]) -> String {
    let lines: Vec<&str> = content.lines().collect();
    line_numbers
        .iter()
        .filter(|&&n| n >= 1 && n <= lines.len())
        .map(|&n| format!("{n:>6}\t{}", lines[n - 1]))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_shows_removed_and_added_lines() {
        let diff = unified_diff("a\nb\nc\n", "a\nB\nc\n", "f", "f");
        assert!(diff.contains("-b"));
        assert!(diff.contains("+B"));
        assert!(diff.contains("@@"));
    }

    #[test]
    fn changed_lines_cover_context_and_additions() {
        let before = "one\ntwo\nthree\nfour\nfive\nsix\nseven\neight\n";
        let after = "one\ntwo\nthree\nFOUR\nfive\nsix\nseven\neight\n";
        let diff = unified_diff(before, after, "f", "f");
        let lines = changed_line_numbers(&diff);
        assert!(lines.contains(&4), "changed line present: {lines:?}");
        assert!(lines.contains(&1), "leading context present: {lines:?}");
        assert!(lines.contains(&7), "trailing context present: {lines:?}");
    }

    #[test]
    fn snippet_renders_numbered_lines() {
        let snippet = numbered_snippet("alpha\nbeta\ngamma", &[2, 3]);
        assert_eq!(snippet, format!("{:>6}\tbeta\n{:>6}\tgamma", 2, 3));
    }

    #[test]
    fn snippet_skips_out_of_range_numbers() {
        let snippet = numbered_snippet("only", &[1, 5]);
        assert_eq!(snippet, format!("{:>6}\tonly", 1));
    }
}
