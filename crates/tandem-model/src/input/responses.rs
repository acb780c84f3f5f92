// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Canonical history → OpenAI Responses input items.
//!
//! Responses is item-oriented: user/assistant messages, `function_call`,
//! `function_call_output`, and replayable `reasoning` items with encrypted
//! content.  The system prompt travels separately as `instructions`.

use serde_json::{json, Value};

use tandem_protocol::{ConversationItem, ImagePart, ToolSchema};

use super::common;

pub fn build_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters,
            })
        })
        .collect()
}

fn input_content(text: &str, images: &Option<Vec<ImagePart>>) -> Vec<Value> {
    let mut parts = vec![json!({ "type": "input_text", "text": text })];
    for part in images.iter().flatten() {
        if let ImagePart::Url { url } = part {
            parts.push(json!({ "type": "input_image", "image_url": url }));
        }
    }
    parts
}

/// Convert the canonical history into Responses `input` items.
pub fn build_input(input: &[ConversationItem], model: &str) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    let mut degraded_thinking: Vec<String> = Vec::new();

    for item in input {
        match item {
            ConversationItem::User(m) => {
                out.push(json!({
                    "type": "message",
                    "role": "user",
                    "content": input_content(&m.content, &m.images),
                }));
            }
            ConversationItem::Developer(m) => {
                out.push(json!({
                    "type": "message",
                    "role": "developer",
                    "content": input_content(&common::wrap_developer_text(&m.content), &None),
                }));
            }
            ConversationItem::ReasoningText(r) => {
                // The encrypted item carries reasoning continuity on this
                // protocol; plain text only matters when it must degrade.
                if !common::replay_reasoning_text(r, model) && !r.content.is_empty() {
                    degraded_thinking.push(r.content.clone());
                }
            }
            ConversationItem::ReasoningEncrypted(e) => {
                if common::replay_reasoning_encrypted(e, model, common::RESPONSES_ENCRYPTED_FORMAT)
                {
                    out.push(json!({
                        "type": "reasoning",
                        "encrypted_content": e.encrypted_content,
                        "summary": [],
                    }));
                }
            }
            ConversationItem::Assistant(m) => {
                let prefix: Vec<String> = std::mem::take(&mut degraded_thinking)
                    .iter()
                    .map(|t| common::degraded_thinking_block(t))
                    .collect();
                let text = if prefix.is_empty() {
                    m.content.clone()
                } else {
                    format!("{}\n{}", prefix.join("\n"), m.content)
                };
                out.push(json!({
                    "type": "message",
                    "role": "assistant",
                    "content": [{ "type": "output_text", "text": text }],
                }));
            }
            ConversationItem::ToolCall(c) => {
                out.push(json!({
                    "type": "function_call",
                    "call_id": c.call_id,
                    "name": c.name,
                    "arguments": c.arguments,
                }));
            }
            ConversationItem::ToolResult(r) => {
                out.push(json!({
                    "type": "function_call_output",
                    "call_id": r.call_id,
                    "output": common::tool_output_text(r),
                }));
            }
            ConversationItem::Start(_)
            | ConversationItem::AssistantDelta(_)
            | ConversationItem::ToolCallStart(_)
            | ConversationItem::ResponseMetadata(_)
            | ConversationItem::TaskMetadata(_)
            | ConversationItem::StreamError(_)
            | ConversationItem::Interrupt(_) => {}
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
