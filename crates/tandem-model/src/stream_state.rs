// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Stream-stage bookkeeping for delta-oriented protocols.
//!
//! Chat Completions interleaves reasoning, content, and indexed tool-call
//! fragments inside one `delta` object with no explicit block boundaries.
//! [`StreamStateManager`] tracks which stage the response is in and owns the
//! accumulated buffers; adapters feed protocol events in and flush stages on
//! transition.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use tandem_protocol::{
    AssistantMessageItem, ConversationItem, ReasoningEncryptedItem, ReasoningTextItem,
    ToolCallItem, ToolCallStartItem,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Waiting,
    Reasoning,
    Assistant,
    Tool,
}

#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug)]
pub struct StreamStateManager {
    pub stage: Stage,
    model: String,
    response_id: Option<String>,
    reasoning: String,
    content: String,
    tool_calls: BTreeMap<u64, ToolCallBuilder>,
    started_indices: HashSet<u64>,
}

impl StreamStateManager {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            stage: Stage::Waiting,
            model: model.into(),
            response_id: None,
            reasoning: String::new(),
            content: String::new(),
            tool_calls: BTreeMap::new(),
            started_indices: HashSet::new(),
        }
    }

    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    pub fn set_response_id(&mut self, id: impl Into<String>) {
        self.response_id = Some(id.into());
    }

    pub fn push_reasoning(&mut self, text: &str) {
        self.stage = Stage::Reasoning;
        self.reasoning.push_str(text);
    }

    /// Append assistant content.  Returns the items flushed by the stage
    /// transition (reasoning or tool buffers), which must be emitted before
    /// the content delta itself.
    pub fn push_content(&mut self, text: &str) -> Vec<ConversationItem> {
        let flushed = match self.stage {
            Stage::Reasoning => self.flush_reasoning(),
            Stage::Tool => self.flush_tool_calls(),
            _ => Vec::new(),
        };
        self.stage = Stage::Assistant;
        self.content.push_str(text);
        flushed
    }

    /// Record one indexed tool-call fragment.  Returns stage-transition
    /// flushes plus a `ToolCallStart` the first time an index shows a name.
    pub fn push_tool_delta(
        &mut self,
        index: u64,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> Vec<ConversationItem> {
        let mut out = match self.stage {
            Stage::Reasoning => self.flush_reasoning(),
            Stage::Assistant => self.flush_assistant(),
            _ => Vec::new(),
        };
        self.stage = Stage::Tool;

        let builder = self.tool_calls.entry(index).or_default();
        if let Some(id) = id {
            if !id.is_empty() {
                builder.id = id.to_string();
            }
        }
        if let Some(name) = name {
            if !name.is_empty() && builder.name.is_empty() {
                builder.name = name.to_string();
            }
        }
        if let Some(args) = arguments {
            builder.arguments.push_str(args);
        }

        if !builder.name.is_empty() && !self.started_indices.contains(&index) {
            self.started_indices.insert(index);
            out.push(ConversationItem::ToolCallStart(ToolCallStartItem::new(
                self.tool_calls[&index].id.clone(),
                self.tool_calls[&index].name.clone(),
                self.response_id.clone(),
            )));
        }
        out
    }

    /// Process one OpenRouter `reasoning_details[]` entry.
    ///
    /// `reasoning.encrypted` carries a Responses-style blob in `data`;
    /// `reasoning.text` carries visible text plus an optional Claude
    /// `signature`.  Both keep their wire `format` so the input builder can
    /// route them on replay.
    pub fn push_reasoning_detail(&mut self, detail: &Value) -> Vec<ConversationItem> {
        let mut out = Vec::new();
        let format = detail["format"].as_str().map(str::to_string);
        match detail["type"].as_str().unwrap_or("") {
            "reasoning.encrypted" => {
                if let Some(data) = detail["data"].as_str().filter(|d| !d.is_empty()) {
                    out.push(ConversationItem::ReasoningEncrypted(
                        ReasoningEncryptedItem::new(
                            data,
                            format,
                            self.model.clone(),
                            self.response_id.clone(),
                        ),
                    ));
                }
            }
            "reasoning.text" | "reasoning.summary" => {
                if let Some(sig) = detail["signature"].as_str().filter(|s| !s.is_empty()) {
                    out.push(ConversationItem::ReasoningEncrypted(
                        ReasoningEncryptedItem::new(
                            sig,
                            format,
                            self.model.clone(),
                            self.response_id.clone(),
                        ),
                    ));
                }
                let text = detail["text"].as_str().or(detail["summary"].as_str());
                if let Some(text) = text.filter(|t| !t.is_empty()) {
                    self.push_reasoning(text);
                }
            }
            _ => {}
        }
        out
    }

    pub fn flush_reasoning(&mut self) -> Vec<ConversationItem> {
        if self.reasoning.is_empty() {
            return Vec::new();
        }
        let text = std::mem::take(&mut self.reasoning);
        vec![ConversationItem::ReasoningText(ReasoningTextItem::new(
            text,
            self.model.clone(),
            self.response_id.clone(),
        ))]
    }

    pub fn flush_assistant(&mut self) -> Vec<ConversationItem> {
        if self.content.is_empty() {
            return Vec::new();
        }
        let content = std::mem::take(&mut self.content);
        vec![ConversationItem::Assistant(AssistantMessageItem::new(
            content,
            self.response_id.clone(),
        ))]
    }

    /// Finalized tool calls in index order.  Only called at stream close;
    /// Chat Completions has no per-tool close event.
    pub fn flush_tool_calls(&mut self) -> Vec<ConversationItem> {
        let calls = std::mem::take(&mut self.tool_calls);
        calls
            .into_values()
            .filter(|b| !b.name.is_empty())
            .map(|b| {
                ConversationItem::ToolCall(ToolCallItem::new(
                    b.id,
                    b.name,
                    b.arguments,
                    self.response_id.clone(),
                ))
            })
            .collect()
    }

    /// Flush every stage in the canonical order: reasoning, assistant, tools.
    pub fn flush_all(&mut self) -> Vec<ConversationItem> {
        let mut out = self.flush_reasoning();
        out.extend(self.flush_assistant());
        out.extend(self.flush_tool_calls());
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_after_reasoning_flushes_reasoning_first() {
        let mut s = StreamStateManager::new("m");
        s.set_response_id("r1");
        s.push_reasoning("let me think");
        let flushed = s.push_content("answer");
        assert_eq!(flushed.len(), 1);
        assert!(
            matches!(&flushed[0], ConversationItem::ReasoningText(r) if r.content == "let me think")
        );
        assert_eq!(s.stage, Stage::Assistant);
    }

    #[test]
    fn tool_delta_after_assistant_flushes_assistant() {
        let mut s = StreamStateManager::new("m");
        s.push_content("hello");
        let flushed = s.push_tool_delta(0, Some("c1"), Some("Read"), Some("{"));
        assert!(matches!(&flushed[0], ConversationItem::Assistant(a) if a.content == "hello"));
        assert!(matches!(&flushed[1], ConversationItem::ToolCallStart(t) if t.name == "Read"));
    }

    #[test]
    fn tool_call_start_emitted_once_per_index() {
        let mut s = StreamStateManager::new("m");
        let first = s.push_tool_delta(0, Some("c1"), Some("Bash"), None);
        assert_eq!(first.len(), 1);
        let second = s.push_tool_delta(0, None, None, Some("{\"cmd\""));
        assert!(second.is_empty(), "no duplicate start: {second:?}");
    }

    #[test]
    fn tool_arguments_accumulate_per_index() {
        let mut s = StreamStateManager::new("m");
        s.set_response_id("r1");
        s.push_tool_delta(0, Some("c1"), Some("Read"), Some("{\"file"));
        s.push_tool_delta(0, None, None, Some("_path\":\"a\"}"));
        s.push_tool_delta(1, Some("c2"), Some("Bash"), Some("{}"));
        let calls = s.flush_tool_calls();
        assert_eq!(calls.len(), 2);
        match &calls[0] {
            ConversationItem::ToolCall(t) => {
                assert_eq!(t.call_id, "c1");
                assert_eq!(t.arguments, r#"{"file_path":"a"}"#);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &calls[1] {
            ConversationItem::ToolCall(t) => assert_eq!(t.name, "Bash"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn flush_all_orders_reasoning_assistant_tools() {
        let mut s = StreamStateManager::new("m");
        s.push_tool_delta(0, Some("c1"), Some("Read"), Some("{}"));
        s.reasoning = "thought".into();
        s.content = "text".into();
        let all = s.flush_all();
        assert!(matches!(all[0], ConversationItem::ReasoningText(_)));
        assert!(matches!(all[1], ConversationItem::Assistant(_)));
        assert!(matches!(all[2], ConversationItem::ToolCall(_)));
    }

    #[test]
    fn flush_assistant_empty_emits_nothing() {
        let mut s = StreamStateManager::new("m");
        assert!(s.flush_assistant().is_empty());
        assert!(s.flush_reasoning().is_empty());
        assert!(s.flush_tool_calls().is_empty());
    }

    #[test]
    fn reasoning_detail_encrypted_emits_blob_with_format() {
        let mut s = StreamStateManager::new("gpt-5");
        s.set_response_id("r1");
        let items = s.push_reasoning_detail(&json!({
            "type": "reasoning.encrypted",
            "format": "openai-responses-v1",
            "data": "ENCRYPTED",
            "index": 0,
        }));
        assert_eq!(items.len(), 1);
        match &items[0] {
            ConversationItem::ReasoningEncrypted(e) => {
                assert_eq!(e.encrypted_content, "ENCRYPTED");
                assert_eq!(e.format.as_deref(), Some("openai-responses-v1"));
                assert_eq!(e.model.as_deref(), Some("gpt-5"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reasoning_detail_text_with_signature_emits_encrypted_and_buffers_text() {
        let mut s = StreamStateManager::new("claude-x");
        let items = s.push_reasoning_detail(&json!({
            "type": "reasoning.text",
            "format": "anthropic-claude-v1",
            "text": "thinking hard",
            "signature": "SIG",
        }));
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], ConversationItem::ReasoningEncrypted(e) if e.encrypted_content == "SIG"));
        let flushed = s.flush_reasoning();
        assert!(
            matches!(&flushed[0], ConversationItem::ReasoningText(r) if r.content == "thinking hard")
        );
    }

    #[test]
    fn unknown_reasoning_detail_type_is_ignored() {
        let mut s = StreamStateManager::new("m");
        assert!(s
            .push_reasoning_detail(&json!({"type": "reasoning.future", "data": "x"}))
            .is_empty());
    }
}
