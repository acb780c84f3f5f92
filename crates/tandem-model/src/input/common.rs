// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use tandem_protocol::{ReasoningEncryptedItem, ReasoningTextItem, ToolResultItem};

/// Format tag on encrypted reasoning produced by the Anthropic adapter
/// (thinking signatures).
pub const ANTHROPIC_SIGNATURE_FORMAT: &str = "anthropic-claude-v1";

/// Format tag on encrypted reasoning produced by the Responses adapter.
pub const RESPONSES_ENCRYPTED_FORMAT: &str = "openai-responses-v1";

/// Canonical stand-in for tool calls that returned nothing.  Providers
/// reject empty tool-result content, and the model should know the call ran.
pub const EMPTY_TOOL_OUTPUT_PLACEHOLDER: &str =
    "<system-reminder>Tool ran without output or errors</system-reminder>";

/// The text a tool result contributes to the model input.
pub fn tool_output_text(result: &ToolResultItem) -> String {
    match result.output.as_deref() {
        Some(text) if !text.trim().is_empty() => text.to_string(),
        _ => EMPTY_TOOL_OUTPUT_PLACEHOLDER.to_string(),
    }
}

/// Developer/reminder text is wrapped so the model can tell it from real
/// user input.
pub fn wrap_developer_text(content: &str) -> String {
    format!("<system-reminder>\n{content}\n</system-reminder>")
}

/// Whether a reasoning text item may be replayed verbatim to the provider.
///
/// Reasoning is only meaningful to the model that produced it; anything
/// else gets the degraded inline form instead.
pub fn replay_reasoning_text(item: &ReasoningTextItem, current_model: &str) -> bool {
    item.model.as_deref() == Some(current_model)
}

/// Whether an encrypted reasoning blob may be replayed.  Requires both the
/// producing model and the wire format to match; mismatches are dropped.
pub fn replay_reasoning_encrypted(
    item: &ReasoningEncryptedItem,
    current_model: &str,
    expected_format: &str,
) -> bool {
    item.model.as_deref() == Some(current_model)
        && item.format.as_deref().map(|f| f == expected_format).unwrap_or(true)
}

/// The degraded inline form of foreign-model reasoning, prepended to the
/// assistant message that followed it.
pub fn degraded_thinking_block(text: &str) -> String {
    format!("<thinking>\n{text}\n</thinking>")
}
