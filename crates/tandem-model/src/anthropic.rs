// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Anthropic Messages streaming adapter.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use tandem_config::{ModelConfig, Protocol, ThinkingConfig};
use tandem_protocol::{
    AssistantMessageDelta, AssistantMessageItem, ConversationItem, ReasoningEncryptedItem,
    ReasoningTextItem, StartItem, StreamErrorItem, ToolCallItem, ToolCallStartItem, Usage,
};

use crate::client::{drive_sse, error_stream, http_client, LlmCallParameter, LlmClient, ResponseStream, SseEventHandler};
use crate::images;
use crate::input::{anthropic as input, common};
use crate::usage::MetadataTracker;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const BETAS: &str = "interleaved-thinking-2025-05-14,context-1m-2025-08-07";
const DEFAULT_MAX_TOKENS: u32 = 8192;
const DEFAULT_THINKING_BUDGET_TOKENS: u32 = 4096;

pub struct AnthropicClient {
    model: String,
    api_key: Option<String>,
    base_url: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    thinking: Option<ThinkingConfig>,
    context_limit: Option<u64>,
    parallel_tool_calls: bool,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            model: config.model_id.clone(),
            api_key: config.resolve_api_key(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            thinking: config.thinking.clone(),
            context_limit: config.context_limit,
            parallel_tool_calls: config.parallel_tool_calls,
            client: http_client(),
        }
    }
}

/// Build the Messages API request body shared with the Copilot adapter.
pub(crate) fn build_request_body(
    input_items: &[ConversationItem],
    system: Option<&str>,
    tools: &[tandem_protocol::ToolSchema],
    model: &str,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    thinking: Option<&ThinkingConfig>,
) -> Value {
    let messages = input::build_messages(input_items, model);
    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "stream": true,
    });
    if let Some(temperature) = temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(system) = system {
        if !system.is_empty() {
            body["system"] = json!(system);
        }
    }
    if !tools.is_empty() {
        body["tools"] = json!(input::build_tools(tools));
        body["tool_choice"] = json!({ "type": "auto", "disable_parallel_tool_use": false });
    }
    body["thinking"] = match thinking {
        Some(cfg) if cfg.enabled => json!({
            "type": "enabled",
            "budget_tokens": cfg.budget_tokens.unwrap_or(DEFAULT_THINKING_BUDGET_TOKENS),
        }),
        _ => json!({ "type": "disabled" }),
    };
    body
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn protocol(&self) -> Protocol {
        Protocol::Anthropic
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_parallel_tool_calls(&self) -> bool {
        self.parallel_tool_calls
    }

    async fn call(&self, param: LlmCallParameter) -> ResponseStream {
        let Some(key) = self.api_key.clone() else {
            return error_stream(&self.model, "Anthropic API key not configured");
        };

        let input_items = images::resolve_input_images(param.input).await;
        let body = build_request_body(
            &input_items,
            param.system.as_deref(),
            &param.tools,
            &self.model,
            param.max_tokens.or(self.max_tokens),
            param.temperature.or(self.temperature),
            param.thinking.as_ref().or(self.thinking.as_ref()),
        );

        debug!(model = %self.model, "sending anthropic request");
        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", BETAS)
            .json(&body)
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => return error_stream(&self.model, format!("Anthropic request failed: {e}")),
        };
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return error_stream(&self.model, format!("Anthropic error {status}: {text}"));
        }

        let handler = AnthropicEventHandler::new(
            &self.model,
            param.context_limit.or(self.context_limit),
        );
        drive_sse(resp, handler)
    }
}

// ─── Event handler ────────────────────────────────────────────────────────────

/// Per-response state machine for the Messages SSE protocol.  Also driven by
/// the Copilot adapter for Claude-family models.
pub(crate) struct AnthropicEventHandler {
    model: String,
    tracker: Option<MetadataTracker>,
    response_id: Option<String>,
    thinking: String,
    content: String,
    tool: Option<(String, String, String)>,
}

impl AnthropicEventHandler {
    pub(crate) fn new(model: &str, context_limit: Option<u64>) -> Self {
        Self {
            model: model.to_string(),
            tracker: Some(MetadataTracker::new(model, context_limit)),
            response_id: None,
            thinking: String::new(),
            content: String::new(),
            tool: None,
        }
    }

    fn flush_thinking(&mut self) -> Option<ConversationItem> {
        if self.thinking.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.thinking);
        Some(ConversationItem::ReasoningText(ReasoningTextItem::new(
            text,
            self.model.clone(),
            self.response_id.clone(),
        )))
    }

    fn flush_content(&mut self) -> Option<ConversationItem> {
        if self.content.is_empty() {
            return None;
        }
        let content = std::mem::take(&mut self.content);
        Some(ConversationItem::Assistant(AssistantMessageItem::new(
            content,
            self.response_id.clone(),
        )))
    }

    fn flush_tool(&mut self) -> Option<ConversationItem> {
        let (id, name, args) = self.tool.take()?;
        Some(ConversationItem::ToolCall(ToolCallItem::new(
            id,
            name,
            args,
            self.response_id.clone(),
        )))
    }

    fn record_token(&mut self) {
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.record_token();
        }
    }

    fn add_usage(&mut self, usage_value: &Value) {
        let usage = Usage {
            input_tokens: usage_value["input_tokens"].as_u64().unwrap_or(0)
                + usage_value["cache_creation_input_tokens"].as_u64().unwrap_or(0),
            cached_tokens: usage_value["cache_read_input_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage_value["output_tokens"].as_u64().unwrap_or(0),
            ..Default::default()
        };
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.add_usage(&usage);
        }
    }
}

impl SseEventHandler for AnthropicEventHandler {
    fn on_event(&mut self, v: &Value) -> Vec<ConversationItem> {
        let mut out = Vec::new();
        match v["type"].as_str().unwrap_or("") {
            "message_start" => {
                let message = &v["message"];
                if let Some(id) = message["id"].as_str() {
                    self.response_id = Some(id.to_string());
                    if let Some(tracker) = self.tracker.as_mut() {
                        tracker.set_response_id(Some(id.to_string()));
                    }
                    out.push(ConversationItem::Start(StartItem::new(id)));
                }
                if message.get("usage").is_some() {
                    self.add_usage(&message["usage"]);
                }
            }
            "content_block_start" => {
                let block = &v["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    let id = block["id"].as_str().unwrap_or("").to_string();
                    let name = block["name"].as_str().unwrap_or("").to_string();
                    out.push(ConversationItem::ToolCallStart(ToolCallStartItem::new(
                        id.clone(),
                        name.clone(),
                        self.response_id.clone(),
                    )));
                    self.tool = Some((id, name, String::new()));
                }
            }
            "content_block_delta" => match v["delta"]["type"].as_str().unwrap_or("") {
                "thinking_delta" => {
                    self.record_token();
                    self.thinking.push_str(v["delta"]["thinking"].as_str().unwrap_or(""));
                }
                // A signature terminates the thinking block: the accumulated
                // text flushes first so the pair replays in order.
                "signature_delta" => {
                    self.record_token();
                    out.extend(self.flush_thinking());
                    if let Some(sig) = v["delta"]["signature"].as_str() {
                        out.push(ConversationItem::ReasoningEncrypted(
                            ReasoningEncryptedItem::new(
                                sig,
                                Some(common::ANTHROPIC_SIGNATURE_FORMAT.into()),
                                self.model.clone(),
                                self.response_id.clone(),
                            ),
                        ));
                    }
                }
                "text_delta" => {
                    self.record_token();
                    let text = v["delta"]["text"].as_str().unwrap_or("");
                    self.content.push_str(text);
                    out.push(ConversationItem::AssistantDelta(AssistantMessageDelta::new(
                        text,
                        self.response_id.clone(),
                    )));
                }
                "input_json_delta" => {
                    self.record_token();
                    if let Some((_, _, args)) = self.tool.as_mut() {
                        args.push_str(v["delta"]["partial_json"].as_str().unwrap_or(""));
                    }
                }
                _ => {}
            },
            "content_block_stop" => {
                out.extend(self.flush_thinking());
                out.extend(self.flush_content());
                out.extend(self.flush_tool());
            }
            "message_delta" => {
                if v.get("usage").is_some() {
                    self.add_usage(&v["usage"]);
                }
            }
            "message_stop" => {}
            "error" => {
                let message = v["error"]["message"]
                    .as_str()
                    .unwrap_or("Anthropic stream error");
                out.push(ConversationItem::StreamError(StreamErrorItem::new(message)));
            }
            _ => {}
        }
        out
    }

    fn finish(&mut self) -> Vec<ConversationItem> {
        let mut out = Vec::new();
        // Leftovers only exist when the stream ended mid-block; surface the
        // partial text so the UI can show it (incomplete tool args are
        // unusable and dropped).
        out.extend(self.flush_thinking());
        out.extend(self.flush_content());
        self.tool = None;
        if let Some(tracker) = self.tracker.take() {
            out.push(ConversationItem::ResponseMetadata(tracker.finalize()));
        }
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handler() -> AnthropicEventHandler {
        AnthropicEventHandler::new("claude-sonnet-4-5", Some(200_000))
    }

    #[test]
    fn message_start_emits_start_item_and_books_usage() {
        let mut h = handler();
        let out = h.on_event(&json!({
            "type": "message_start",
            "message": {
                "id": "msg_01",
                "usage": {
                    "input_tokens": 40,
                    "cache_creation_input_tokens": 10,
                    "cache_read_input_tokens": 80,
                    "output_tokens": 0
                }
            }
        }));
        assert!(matches!(&out[0], ConversationItem::Start(s) if s.response_id == "msg_01"));
        let meta = h.finish().pop().unwrap();
        match meta {
            ConversationItem::ResponseMetadata(m) => {
                let usage = m.usage.unwrap();
                assert_eq!(usage.input_tokens, 50, "input includes cache creation");
                assert_eq!(usage.cached_tokens, 80);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn thinking_then_signature_emits_text_then_encrypted() {
        let mut h = handler();
        for chunk in ["planning: ", "read and ", "echo"] {
            h.on_event(&json!({
                "type": "content_block_delta",
                "delta": { "type": "thinking_delta", "thinking": chunk }
            }));
        }
        let out = h.on_event(&json!({
            "type": "content_block_delta",
            "delta": { "type": "signature_delta", "signature": "abc" }
        }));
        assert_eq!(out.len(), 2);
        assert!(
            matches!(&out[0], ConversationItem::ReasoningText(r) if r.content == "planning: read and echo")
        );
        assert!(
            matches!(&out[1], ConversationItem::ReasoningEncrypted(e) if e.encrypted_content == "abc")
        );
    }

    #[test]
    fn text_deltas_stream_and_finalize_on_block_stop() {
        let mut h = handler();
        h.on_event(&json!({"type": "message_start", "message": {"id": "r1"}}));
        let d1 = h.on_event(&json!({
            "type": "content_block_delta",
            "delta": { "type": "text_delta", "text": "Hello " }
        }));
        assert!(matches!(&d1[0], ConversationItem::AssistantDelta(d) if d.content == "Hello "));
        h.on_event(&json!({
            "type": "content_block_delta",
            "delta": { "type": "text_delta", "text": "world" }
        }));
        let out = h.on_event(&json!({"type": "content_block_stop"}));
        // Finalized message equals the concatenation of its deltas.
        assert!(matches!(&out[0], ConversationItem::Assistant(a) if a.content == "Hello world"));
    }

    #[test]
    fn tool_use_block_produces_start_then_call() {
        let mut h = handler();
        let out = h.on_event(&json!({
            "type": "content_block_start",
            "index": 1,
            "content_block": { "type": "tool_use", "id": "tu_1", "name": "Read" }
        }));
        assert!(
            matches!(&out[0], ConversationItem::ToolCallStart(t) if t.call_id == "tu_1" && t.name == "Read")
        );
        h.on_event(&json!({
            "type": "content_block_delta",
            "delta": { "type": "input_json_delta", "partial_json": "{\"file_path\":" }
        }));
        h.on_event(&json!({
            "type": "content_block_delta",
            "delta": { "type": "input_json_delta", "partial_json": "\"a.txt\"}" }
        }));
        let out = h.on_event(&json!({"type": "content_block_stop"}));
        match &out[0] {
            ConversationItem::ToolCall(t) => {
                assert_eq!(t.call_id, "tu_1");
                assert_eq!(t.arguments, r#"{"file_path":"a.txt"}"#);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn message_delta_usage_is_additive() {
        let mut h = handler();
        h.on_event(&json!({
            "type": "message_start",
            "message": { "id": "r1", "usage": { "input_tokens": 100, "output_tokens": 0 } }
        }));
        h.on_event(&json!({
            "type": "message_delta",
            "usage": { "output_tokens": 42 }
        }));
        let meta = h.finish().pop().unwrap();
        match meta {
            ConversationItem::ResponseMetadata(m) => {
                let usage = m.usage.unwrap();
                assert_eq!(usage.input_tokens, 100);
                assert_eq!(usage.output_tokens, 42);
                assert_eq!(usage.context_window_size, Some(142));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn error_event_surfaces_stream_error() {
        let mut h = handler();
        let out = h.on_event(&json!({
            "type": "error",
            "error": { "type": "overloaded_error", "message": "Overloaded" }
        }));
        assert!(matches!(&out[0], ConversationItem::StreamError(e) if e.error == "Overloaded"));
    }

    #[test]
    fn finish_surfaces_partial_text_and_exactly_one_metadata() {
        let mut h = handler();
        h.on_event(&json!({
            "type": "content_block_delta",
            "delta": { "type": "text_delta", "text": "partial answ" }
        }));
        let out = h.finish();
        assert!(matches!(&out[0], ConversationItem::Assistant(a) if a.content == "partial answ"));
        let metadata_count = out
            .iter()
            .filter(|i| matches!(i, ConversationItem::ResponseMetadata(_)))
            .count();
        assert_eq!(metadata_count, 1);
    }

    #[test]
    fn request_body_carries_thinking_and_tool_choice() {
        let thinking = ThinkingConfig { enabled: true, budget_tokens: Some(2048), ..Default::default() };
        let tools = vec![tandem_protocol::ToolSchema {
            name: "Bash".into(),
            description: "run".into(),
            parameters: json!({"type": "object"}),
        }];
        let body = build_request_body(&[], Some("sys"), &tools, "claude-x", None, Some(0.2), Some(&thinking));
        assert_eq!(body["thinking"]["type"], "enabled");
        assert_eq!(body["thinking"]["budget_tokens"], 2048);
        assert_eq!(body["tool_choice"]["disable_parallel_tool_use"], false);
        assert_eq!(body["system"], "sys");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn request_body_disables_thinking_by_default() {
        let body = build_request_body(&[], None, &[], "claude-x", Some(1024), None, None);
        assert_eq!(body["thinking"]["type"], "disabled");
        assert_eq!(body["max_tokens"], 1024);
        assert!(body.get("system").is_none());
        assert!(body.get("tools").is_none());
    }
}
