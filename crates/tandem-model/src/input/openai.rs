// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Canonical history → Chat Completions wire format.
//!
//! One assistant turn becomes a single assistant message carrying both the
//! text and the `tool_calls` array; tool results follow as `role: "tool"`
//! messages linked by `tool_call_id`.  OpenRouter reasoning details are
//! replayed on the assistant message when the producing model matches.

use serde_json::{json, Value};

use tandem_protocol::{ConversationItem, ImagePart, ToolSchema};

use super::common;

pub fn build_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

fn user_content(text: &str, images: &Option<Vec<ImagePart>>) -> Value {
    let image_parts: Vec<Value> = images
        .iter()
        .flatten()
        .filter_map(|p| match p {
            ImagePart::Url { url } => {
                Some(json!({ "type": "image_url", "image_url": { "url": url } }))
            }
            ImagePart::File { .. } => None,
        })
        .collect();
    if image_parts.is_empty() {
        return json!(text);
    }
    let mut parts = vec![json!({ "type": "text", "text": text })];
    parts.extend(image_parts);
    json!(parts)
}

#[derive(Default)]
struct ChatBuilder {
    model: String,
    out: Vec<Value>,
    /// Degraded foreign-model reasoning, prepended to the next assistant text.
    degraded_thinking: Vec<String>,
    /// Replayable reasoning details for the next assistant message.
    reasoning_details: Vec<Value>,
    assistant_text: Option<String>,
    tool_calls: Vec<Value>,
}

impl ChatBuilder {
    fn new(model: &str) -> Self {
        Self { model: model.to_string(), ..Default::default() }
    }

    fn flush_assistant(&mut self) {
        if self.assistant_text.is_none() && self.tool_calls.is_empty() {
            return;
        }
        let mut msg = json!({ "role": "assistant" });
        match self.assistant_text.take() {
            Some(text) => msg["content"] = json!(text),
            None => msg["content"] = Value::Null,
        }
        if !self.tool_calls.is_empty() {
            msg["tool_calls"] = json!(std::mem::take(&mut self.tool_calls));
        }
        if !self.reasoning_details.is_empty() {
            msg["reasoning_details"] = json!(std::mem::take(&mut self.reasoning_details));
        }
        self.out.push(msg);
    }

    fn degraded_prefix(&mut self) -> String {
        let blocks: Vec<String> = std::mem::take(&mut self.degraded_thinking)
            .iter()
            .map(|t| common::degraded_thinking_block(t))
            .collect();
        if blocks.is_empty() {
            String::new()
        } else {
            format!("{}\n", blocks.join("\n"))
        }
    }

    fn build(mut self, input: &[ConversationItem], system: Option<&str>) -> Vec<Value> {
        if let Some(system) = system {
            self.out.push(json!({ "role": "system", "content": system }));
        }
        for item in input {
            match item {
                ConversationItem::User(m) => {
                    self.flush_assistant();
                    self.out.push(json!({
                        "role": "user",
                        "content": user_content(&m.content, &m.images),
                    }));
                }
                ConversationItem::Developer(m) => {
                    self.flush_assistant();
                    self.out.push(json!({
                        "role": "user",
                        "content": common::wrap_developer_text(&m.content),
                    }));
                }
                ConversationItem::ReasoningText(r) => {
                    if common::replay_reasoning_text(r, &self.model) {
                        self.reasoning_details.push(json!({
                            "type": "reasoning.text",
                            "format": r.model,
                            "text": r.content,
                        }));
                    } else if !r.content.is_empty() {
                        self.degraded_thinking.push(r.content.clone());
                    }
                }
                ConversationItem::ReasoningEncrypted(e) => {
                    // Chat protocol replays encrypted reasoning only through
                    // OpenRouter's reasoning_details array, keyed by the
                    // original wire format.
                    if e.model.as_deref() == Some(self.model.as_str()) {
                        self.reasoning_details.push(json!({
                            "type": "reasoning.encrypted",
                            "format": e.format,
                            "data": e.encrypted_content,
                        }));
                    }
                }
                ConversationItem::Assistant(m) => {
                    let text = format!("{}{}", self.degraded_prefix(), m.content);
                    self.assistant_text = Some(text);
                }
                ConversationItem::ToolCall(c) => {
                    self.tool_calls.push(json!({
                        "id": c.call_id,
                        "type": "function",
                        "function": { "name": c.name, "arguments": c.arguments },
                    }));
                }
                ConversationItem::ToolResult(r) => {
                    self.flush_assistant();
                    self.out.push(json!({
                        "role": "tool",
                        "tool_call_id": r.call_id,
                        "content": common::tool_output_text(r),
                    }));
                    // The tool role cannot carry images; echo them through a
                    // follow-up user message instead.
                    if r.images.as_ref().map(|v| !v.is_empty()).unwrap_or(false) {
                        self.out.push(json!({
                            "role": "user",
                            "content": user_content(
                                "Images from the preceding tool result:",
                                &r.images,
                            ),
                        }));
                    }
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
        self.flush_assistant();
        self.out
    }
}

/// Convert the canonical history into Chat Completions `messages`.
pub fn build_messages(
    input: &[ConversationItem],
    system: Option<&str>,
    model: &str,
) -> Vec<Value> {
    ChatBuilder::new(model).build(input, system)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_protocol::{
        AssistantMessageItem, ReasoningEncryptedItem, ReasoningTextItem, ToolCallItem,
        ToolResultItem, UserMessageItem,
    };

    const MODEL: &str = "anthropic/claude-sonnet-4-5";

    #[test]
    fn system_prompt_leads_the_messages() {
        let msgs = build_messages(
            &[ConversationItem::User(UserMessageItem::new("hi"))],
            Some("be terse"),
            MODEL,
        );
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[0]["content"], "be terse");
        assert_eq!(msgs[1]["role"], "user");
    }

    #[test]
    fn assistant_text_and_tool_calls_share_one_message() {
        let history = vec![
            ConversationItem::Assistant(AssistantMessageItem::new("checking", None)),
            ConversationItem::ToolCall(ToolCallItem::new("c1", "Bash", r#"{"cmd":"ls"}"#, None)),
            ConversationItem::ToolCall(ToolCallItem::new("c2", "Read", "{}", None)),
        ];
        let msgs = build_messages(&history, None, MODEL);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["content"], "checking");
        let calls = msgs[0]["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0]["id"], "c1");
        assert_eq!(calls[0]["function"]["name"], "Bash");
    }

    #[test]
    fn bare_tool_calls_produce_null_content() {
        let history = vec![ConversationItem::ToolCall(ToolCallItem::new("c1", "Bash", "{}", None))];
        let msgs = build_messages(&history, None, MODEL);
        assert!(msgs[0]["content"].is_null());
    }

    #[test]
    fn tool_result_links_by_call_id() {
        let mut r = ToolResultItem::success("listing");
        r.call_id = "c1".into();
        let msgs = build_messages(&[ConversationItem::ToolResult(r)], None, MODEL);
        assert_eq!(msgs[0]["role"], "tool");
        assert_eq!(msgs[0]["tool_call_id"], "c1");
        assert_eq!(msgs[0]["content"], "listing");
    }

    #[test]
    fn tool_result_images_echo_as_user_message() {
        let mut r = ToolResultItem::success("screenshot taken");
        r.call_id = "c1".into();
        r.images = Some(vec![ImagePart::url("data:image/png;base64,AA==")]);
        let msgs = build_messages(&[ConversationItem::ToolResult(r)], None, MODEL);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1]["role"], "user");
        assert_eq!(msgs[1]["content"][1]["type"], "image_url");
    }

    #[test]
    fn matching_reasoning_replays_in_details() {
        let history = vec![
            ConversationItem::ReasoningEncrypted(ReasoningEncryptedItem::new(
                "BLOB",
                Some("openai-responses-v1".into()),
                MODEL,
                None,
            )),
            ConversationItem::Assistant(AssistantMessageItem::new("ok", None)),
        ];
        let msgs = build_messages(&history, None, MODEL);
        let details = msgs[0]["reasoning_details"].as_array().unwrap();
        assert_eq!(details[0]["type"], "reasoning.encrypted");
        assert_eq!(details[0]["data"], "BLOB");
    }

    #[test]
    fn foreign_reasoning_degrades_and_drops_blob() {
        let history = vec![
            ConversationItem::ReasoningText(ReasoningTextItem::new("old", "gpt-5", None)),
            ConversationItem::ReasoningEncrypted(ReasoningEncryptedItem::new(
                "BLOB", None, "gpt-5", None,
            )),
            ConversationItem::Assistant(AssistantMessageItem::new("fresh answer", None)),
        ];
        let msgs = build_messages(&history, None, MODEL);
        let text = msgs[0]["content"].as_str().unwrap();
        assert!(text.contains("<thinking>\nold\n</thinking>"), "{text}");
        assert!(msgs[0].get("reasoning_details").is_none());
    }

    #[test]
    fn empty_tool_output_uses_placeholder() {
        let mut r = ToolResultItem::success("");
        r.call_id = "c1".into();
        let msgs = build_messages(&[ConversationItem::ToolResult(r)], None, MODEL);
        assert!(msgs[0]["content"]
            .as_str()
            .unwrap()
            .contains("Tool ran without output"));
    }

    #[test]
    fn build_tools_wraps_function_schema() {
        let wire = build_tools(&[ToolSchema {
            name: "Edit".into(),
            description: "edit".into(),
            parameters: json!({"type": "object"}),
        }]);
        assert_eq!(wire[0]["type"], "function");
        assert_eq!(wire[0]["function"]["name"], "Edit");
    }
}
