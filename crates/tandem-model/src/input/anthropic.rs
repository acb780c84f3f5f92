// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Canonical history → Anthropic Messages wire format.
//!
//! Anthropic groups one assistant turn (thinking, text, tool_use) into a
//! single assistant message and expects the matching tool_result blocks in
//! one following user message, so the builder buffers blocks and flushes the
//! group when the other side of the conversation starts.

use serde_json::{json, Value};
use tracing::warn;

use tandem_protocol::{ConversationItem, ImagePart, ToolSchema};

use super::common;

pub fn build_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.parameters,
            })
        })
        .collect()
}

fn image_block(url: &str) -> Value {
    if let Ok((mime, data)) = tandem_image::parse_data_url(url) {
        use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
        json!({
            "type": "image",
            "source": { "type": "base64", "media_type": mime, "data": B64.encode(data) }
        })
    } else {
        json!({ "type": "image", "source": { "type": "url", "url": url } })
    }
}

fn image_blocks(images: &Option<Vec<ImagePart>>) -> Vec<Value> {
    images
        .iter()
        .flatten()
        .filter_map(|part| match part {
            ImagePart::Url { url } => Some(image_block(url)),
            ImagePart::File { path, .. } => {
                // File parts are resolved to data URLs before input building.
                warn!(path = %path, "unresolved image file reached the input builder");
                None
            }
        })
        .collect()
}

#[derive(Default)]
struct MessageBuilder {
    model: String,
    out: Vec<Value>,
    assistant_blocks: Vec<Value>,
    tool_result_blocks: Vec<Value>,
    /// Replayable thinking text waiting for its signature.
    pending_thinking: Option<String>,
    /// Foreign-model reasoning degraded into the next assistant text.
    degraded_thinking: Vec<String>,
}

impl MessageBuilder {
    fn new(model: &str) -> Self {
        Self { model: model.to_string(), ..Default::default() }
    }

    fn flush_assistant(&mut self) {
        // A thinking block without a signature cannot be replayed.
        if let Some(orphan) = self.pending_thinking.take() {
            self.degraded_thinking.push(orphan);
        }
        if self.assistant_blocks.is_empty() {
            return;
        }
        let content = std::mem::take(&mut self.assistant_blocks);
        self.out.push(json!({ "role": "assistant", "content": content }));
    }

    fn flush_tool_results(&mut self) {
        if self.tool_result_blocks.is_empty() {
            return;
        }
        let content = std::mem::take(&mut self.tool_result_blocks);
        self.out.push(json!({ "role": "user", "content": content }));
    }

    fn push_user_text(&mut self, text: String, images: Vec<Value>) {
        self.flush_assistant();
        self.flush_tool_results();
        if images.is_empty() {
            self.out.push(json!({ "role": "user", "content": text }));
        } else {
            let mut content = vec![json!({ "type": "text", "text": text })];
            content.extend(images);
            self.out.push(json!({ "role": "user", "content": content }));
        }
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

    fn build(mut self, input: &[ConversationItem]) -> Vec<Value> {
        for item in input {
            match item {
                ConversationItem::User(m) => {
                    self.push_user_text(m.content.clone(), image_blocks(&m.images));
                }
                ConversationItem::Developer(m) => {
                    self.push_user_text(common::wrap_developer_text(&m.content), Vec::new());
                }
                ConversationItem::ReasoningText(r) => {
                    self.flush_tool_results();
                    if common::replay_reasoning_text(r, &self.model) {
                        self.pending_thinking = Some(r.content.clone());
                    } else if !r.content.is_empty() {
                        self.degraded_thinking.push(r.content.clone());
                    }
                }
                ConversationItem::ReasoningEncrypted(e) => {
                    self.flush_tool_results();
                    let replayable = common::replay_reasoning_encrypted(
                        e,
                        &self.model,
                        common::ANTHROPIC_SIGNATURE_FORMAT,
                    );
                    match (replayable, self.pending_thinking.take()) {
                        (true, Some(thinking)) => {
                            self.assistant_blocks.push(json!({
                                "type": "thinking",
                                "thinking": thinking,
                                "signature": e.encrypted_content,
                            }));
                        }
                        (true, None) => {
                            // Signature without its thinking text is useless.
                        }
                        (false, pending) => {
                            if let Some(thinking) = pending {
                                self.degraded_thinking.push(thinking);
                            }
                        }
                    }
                }
                ConversationItem::Assistant(m) => {
                    self.flush_tool_results();
                    // Reasoning that never got its signature cannot replay.
                    if let Some(orphan) = self.pending_thinking.take() {
                        self.degraded_thinking.push(orphan);
                    }
                    let text = format!("{}{}", self.degraded_prefix(), m.content);
                    if !text.is_empty() {
                        self.assistant_blocks.push(json!({ "type": "text", "text": text }));
                    }
                }
                ConversationItem::ToolCall(c) => {
                    self.flush_tool_results();
                    // Anthropic requires tool_use.id to match ^[a-zA-Z0-9_-]+$;
                    // an empty id can arise from a malformed stream.
                    let safe_id = if c.call_id.is_empty() {
                        warn!(tool_name = %c.name, "tool call with empty id; substituting fallback");
                        "tc_fallback".to_string()
                    } else {
                        c.call_id.clone()
                    };
                    self.assistant_blocks.push(json!({
                        "type": "tool_use",
                        "id": safe_id,
                        "name": c.name,
                        "input": serde_json::from_str::<Value>(&c.arguments).unwrap_or(json!({})),
                    }));
                }
                ConversationItem::ToolResult(r) => {
                    self.flush_assistant();
                    let text = common::tool_output_text(r);
                    let images = image_blocks(&r.images);
                    let content: Value = if images.is_empty() {
                        json!(text)
                    } else {
                        let mut blocks = vec![json!({ "type": "text", "text": text })];
                        blocks.extend(images);
                        json!(blocks)
                    };
                    self.tool_result_blocks.push(json!({
                        "type": "tool_result",
                        "tool_use_id": r.call_id,
                        "content": content,
                        "is_error": r.is_error(),
                    }));
                }
                // Stream bookkeeping and metadata never reach the wire.
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
        self.flush_tool_results();
        self.out
    }
}

/// Convert the canonical history into Anthropic `messages`.
pub fn build_messages(input: &[ConversationItem], model: &str) -> Vec<Value> {
    MessageBuilder::new(model).build(input)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_protocol::{
        AssistantMessageItem, DeveloperMessageItem, ReasoningEncryptedItem, ReasoningTextItem,
        ToolCallItem, ToolResultItem, UserMessageItem,
    };

    const MODEL: &str = "claude-sonnet-4-5";

    fn user(text: &str) -> ConversationItem {
        ConversationItem::User(UserMessageItem::new(text))
    }

    fn assistant(text: &str) -> ConversationItem {
        ConversationItem::Assistant(AssistantMessageItem::new(text, None))
    }

    #[test]
    fn plain_exchange_maps_to_roles() {
        let msgs = build_messages(&[user("hi"), assistant("hello")], MODEL);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0]["role"], "user");
        assert_eq!(msgs[0]["content"], "hi");
        assert_eq!(msgs[1]["role"], "assistant");
        assert_eq!(msgs[1]["content"][0]["text"], "hello");
    }

    #[test]
    fn assistant_turn_groups_text_and_tool_uses() {
        let history = vec![
            user("list files"),
            assistant("Let me look."),
            ConversationItem::ToolCall(ToolCallItem::new("c1", "Bash", r#"{"cmd":"ls"}"#, None)),
            ConversationItem::ToolCall(ToolCallItem::new("c2", "Read", r#"{"file_path":"a"}"#, None)),
        ];
        let msgs = build_messages(&history, MODEL);
        assert_eq!(msgs.len(), 2);
        let content = msgs[1]["content"].as_array().unwrap();
        assert_eq!(content.len(), 3);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "tool_use");
        assert_eq!(content[1]["id"], "c1");
        assert_eq!(content[1]["input"]["cmd"], "ls");
        assert_eq!(content[2]["id"], "c2");
    }

    #[test]
    fn tool_results_group_into_one_user_message() {
        let mut r1 = ToolResultItem::success("out1");
        r1.call_id = "c1".into();
        let mut r2 = ToolResultItem::error("bad");
        r2.call_id = "c2".into();
        let history = vec![
            ConversationItem::ToolCall(ToolCallItem::new("c1", "Bash", "{}", None)),
            ConversationItem::ToolCall(ToolCallItem::new("c2", "Read", "{}", None)),
            ConversationItem::ToolResult(r1),
            ConversationItem::ToolResult(r2),
        ];
        let msgs = build_messages(&history, MODEL);
        assert_eq!(msgs.len(), 2);
        let results = msgs[1]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["type"], "tool_result");
        assert_eq!(results[0]["tool_use_id"], "c1");
        assert_eq!(results[0]["is_error"], false);
        assert_eq!(results[1]["is_error"], true);
    }

    #[test]
    fn empty_tool_output_gets_placeholder() {
        let mut r = ToolResultItem::success("");
        r.call_id = "c1".into();
        let msgs = build_messages(&[ConversationItem::ToolResult(r)], MODEL);
        let text = msgs[0]["content"][0]["content"].as_str().unwrap();
        assert!(text.contains("Tool ran without output"), "{text}");
    }

    #[test]
    fn matching_reasoning_replays_as_thinking_block() {
        let history = vec![
            ConversationItem::ReasoningText(ReasoningTextItem::new("plan it", MODEL, None)),
            ConversationItem::ReasoningEncrypted(ReasoningEncryptedItem::new(
                "SIG",
                Some(common::ANTHROPIC_SIGNATURE_FORMAT.into()),
                MODEL,
                None,
            )),
            assistant("done"),
        ];
        let msgs = build_messages(&history, MODEL);
        let content = msgs[0]["content"].as_array().unwrap();
        assert_eq!(content[0]["type"], "thinking");
        assert_eq!(content[0]["thinking"], "plan it");
        assert_eq!(content[0]["signature"], "SIG");
        assert_eq!(content[1]["type"], "text");
    }

    #[test]
    fn foreign_model_reasoning_degrades_to_inline_thinking() {
        let history = vec![
            ConversationItem::ReasoningText(ReasoningTextItem::new("old thoughts", "other-model", None)),
            ConversationItem::ReasoningEncrypted(ReasoningEncryptedItem::new(
                "SIG", None, "other-model", None,
            )),
            assistant("the answer"),
        ];
        let msgs = build_messages(&history, MODEL);
        let text = msgs[0]["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("<thinking>\nold thoughts\n</thinking>"), "{text}");
        assert!(text.ends_with("the answer"));
        // Encrypted blob from a foreign model is dropped entirely.
        assert!(!msgs[0].to_string().contains("SIG"));
    }

    #[test]
    fn thinking_without_signature_degrades() {
        let history = vec![
            ConversationItem::ReasoningText(ReasoningTextItem::new("unsigned", MODEL, None)),
            assistant("answer"),
        ];
        let msgs = build_messages(&history, MODEL);
        let text = msgs[0]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("<thinking>"), "{text}");
    }

    #[test]
    fn developer_message_is_wrapped_reminder() {
        let msgs = build_messages(
            &[ConversationItem::Developer(DeveloperMessageItem::new("todo list empty"))],
            MODEL,
        );
        let text = msgs[0]["content"].as_str().unwrap();
        assert!(text.starts_with("<system-reminder>"));
        assert_eq!(msgs[0]["role"], "user");
    }

    #[test]
    fn empty_tool_call_id_gets_fallback() {
        let msgs = build_messages(
            &[ConversationItem::ToolCall(ToolCallItem::new("", "Bash", "{}", None))],
            MODEL,
        );
        assert_eq!(msgs[0]["content"][0]["id"], "tc_fallback");
    }

    #[test]
    fn build_tools_uses_input_schema_key() {
        let tools = vec![ToolSchema {
            name: "Read".into(),
            description: "read a file".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let wire = build_tools(&tools);
        assert_eq!(wire[0]["name"], "Read");
        assert_eq!(wire[0]["input_schema"]["type"], "object");
    }

    #[test]
    fn user_image_data_url_becomes_base64_source() {
        let m = UserMessageItem::with_images(
            "see this",
            vec![ImagePart::url("data:image/png;base64,aGVsbG8=")],
        );
        let msgs = build_messages(&[ConversationItem::User(m)], MODEL);
        let content = msgs[0]["content"].as_array().unwrap();
        assert_eq!(content[1]["type"], "image");
        assert_eq!(content[1]["source"]["type"], "base64");
        assert_eq!(content[1]["source"]["media_type"], "image/png");
    }
}
