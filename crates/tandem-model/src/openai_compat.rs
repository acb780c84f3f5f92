// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI Chat Completions streaming adapter.
//!
//! Also serves OpenRouter and other compatible endpoints: reasoning arrives
//! either as bare `reasoning`/`reasoning_content` delta fields or as
//! OpenRouter `reasoning_details[]` entries, and a `provider` field on the
//! chunk names the upstream provider.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use tandem_config::{ModelConfig, Protocol, ThinkingConfig};
use tandem_protocol::{
    AssistantMessageDelta, ConversationItem, StartItem, Usage,
};

use crate::client::{
    drive_sse, error_stream, http_client, LlmCallParameter, LlmClient, ResponseStream,
    SseEventHandler,
};
use crate::images;
use crate::input::openai as input;
use crate::stream_state::{Stage, StreamStateManager};
use crate::usage::MetadataTracker;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiCompatClient {
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

impl OpenAiCompatClient {
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

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn protocol(&self) -> Protocol {
        Protocol::OpenAi
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_parallel_tool_calls(&self) -> bool {
        self.parallel_tool_calls
    }

    async fn call(&self, param: LlmCallParameter) -> ResponseStream {
        let Some(key) = self.api_key.clone() else {
            return error_stream(&self.model, "OpenAI API key not configured");
        };

        let input_items = images::resolve_input_images(param.input).await;
        let messages = input::build_messages(&input_items, param.system.as_deref(), &self.model);

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if let Some(max_tokens) = param.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = param.temperature.or(self.temperature) {
            body["temperature"] = json!(temperature);
        }
        if !param.tools.is_empty() {
            body["tools"] = json!(input::build_tools(&param.tools));
            body["tool_choice"] = json!("auto");
            body["parallel_tool_calls"] = json!(self.parallel_tool_calls);
        }
        let thinking = param.thinking.as_ref().or(self.thinking.as_ref());
        if let Some(effort) = thinking.and_then(|t| t.reasoning_effort.clone()) {
            body["reasoning_effort"] = json!(effort);
        }

        debug!(model = %self.model, "sending chat completions request");
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => return error_stream(&self.model, format!("Chat request failed: {e}")),
        };
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return error_stream(&self.model, format!("Chat error {status}: {text}"));
        }

        let handler =
            ChatEventHandler::new(&self.model, param.context_limit.or(self.context_limit));
        drive_sse(resp, handler)
    }
}

// ─── Event handler ────────────────────────────────────────────────────────────

fn convert_usage(v: &Value) -> Usage {
    Usage {
        input_tokens: v["prompt_tokens"].as_u64().unwrap_or(0),
        cached_tokens: v["prompt_tokens_details"]["cached_tokens"].as_u64().unwrap_or(0),
        reasoning_tokens: v["completion_tokens_details"]["reasoning_tokens"]
            .as_u64()
            .unwrap_or(0),
        output_tokens: v["completion_tokens"].as_u64().unwrap_or(0),
        context_window_size: v["total_tokens"].as_u64(),
        ..Default::default()
    }
}

pub(crate) struct ChatEventHandler {
    state: StreamStateManager,
    tracker: Option<MetadataTracker>,
}

impl ChatEventHandler {
    pub(crate) fn new(model: &str, context_limit: Option<u64>) -> Self {
        Self {
            state: StreamStateManager::new(model),
            tracker: Some(MetadataTracker::new(model, context_limit)),
        }
    }

    fn record_token(&mut self) {
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.record_token();
        }
    }
}

impl SseEventHandler for ChatEventHandler {
    fn on_event(&mut self, v: &Value) -> Vec<ConversationItem> {
        let mut out = Vec::new();

        if self.state.response_id().is_none() {
            if let Some(id) = v["id"].as_str().filter(|id| !id.is_empty()) {
                self.state.set_response_id(id);
                if let Some(tracker) = self.tracker.as_mut() {
                    tracker.set_response_id(Some(id.to_string()));
                }
                out.push(ConversationItem::Start(StartItem::new(id)));
            }
        }

        // Some gateways return a null usage field on intermediate chunks.
        if v["usage"]["completion_tokens"].is_u64() {
            if let Some(tracker) = self.tracker.as_mut() {
                tracker.set_usage(convert_usage(&v["usage"]));
            }
        }
        if let Some(model) = v["model"].as_str().filter(|m| !m.is_empty()) {
            if let Some(tracker) = self.tracker.as_mut() {
                tracker.set_model_name(model);
            }
        }
        if let Some(provider) = v["provider"].as_str() {
            if let Some(tracker) = self.tracker.as_mut() {
                tracker.set_provider(provider);
            }
        }

        let Some(choice) = v["choices"].get(0) else {
            return out;
        };
        let delta = &choice["delta"];

        let reasoning_content = delta["reasoning"]
            .as_str()
            .filter(|r| !r.is_empty())
            .or_else(|| delta["reasoning_content"].as_str().filter(|r| !r.is_empty()));
        if let Some(reasoning) = reasoning_content {
            self.record_token();
            self.state.push_reasoning(reasoning);
        }

        if let Some(details) = delta["reasoning_details"].as_array() {
            self.record_token();
            for detail in details {
                out.extend(self.state.push_reasoning_detail(detail));
            }
        }

        if let Some(content) = delta["content"].as_str() {
            // In the reasoning stage, whitespace-only content is noise some
            // providers emit between phases; real content forces the
            // transition.
            if self.state.stage == Stage::Assistant || !content.trim().is_empty() {
                self.record_token();
                out.extend(self.state.push_content(content));
                out.push(ConversationItem::AssistantDelta(AssistantMessageDelta::new(
                    content,
                    self.state.response_id().map(str::to_string),
                )));
            }
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            self.record_token();
            for tc in tool_calls {
                let index = tc["index"].as_u64().unwrap_or(0);
                out.extend(self.state.push_tool_delta(
                    index,
                    tc["id"].as_str(),
                    tc["function"]["name"].as_str(),
                    tc["function"]["arguments"].as_str(),
                ));
            }
        }

        out
    }

    fn finish(&mut self) -> Vec<ConversationItem> {
        let mut out = self.state.flush_all();
        if let Some(mut tracker) = self.tracker.take() {
            tracker.set_response_id(self.state.response_id().map(str::to_string));
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

    fn handler() -> ChatEventHandler {
        ChatEventHandler::new("gpt-4o", Some(128_000))
    }

    fn delta_chunk(delta: Value) -> Value {
        json!({ "id": "chatcmpl-1", "choices": [{ "index": 0, "delta": delta }] })
    }

    #[test]
    fn first_chunk_with_id_emits_start() {
        let mut h = handler();
        let out = h.on_event(&delta_chunk(json!({ "content": "hi" })));
        assert!(matches!(&out[0], ConversationItem::Start(s) if s.response_id == "chatcmpl-1"));
        // Second chunk must not emit another start.
        let out = h.on_event(&delta_chunk(json!({ "content": "!" })));
        assert!(!out.iter().any(|i| matches!(i, ConversationItem::Start(_))));
    }

    #[test]
    fn reasoning_then_content_flushes_reasoning_item() {
        let mut h = handler();
        h.on_event(&delta_chunk(json!({ "reasoning": "thinking..." })));
        let out = h.on_event(&delta_chunk(json!({ "content": "Answer" })));
        let reasoning: Vec<_> = out
            .iter()
            .filter(|i| matches!(i, ConversationItem::ReasoningText(_)))
            .collect();
        assert_eq!(reasoning.len(), 1);
        assert!(out
            .iter()
            .any(|i| matches!(i, ConversationItem::AssistantDelta(d) if d.content == "Answer")));
    }

    #[test]
    fn whitespace_content_during_reasoning_is_dropped() {
        let mut h = handler();
        h.on_event(&delta_chunk(json!({ "reasoning_content": "hmm" })));
        let out = h.on_event(&delta_chunk(json!({ "content": "\n" })));
        assert!(
            !out.iter().any(|i| matches!(i, ConversationItem::AssistantDelta(_))),
            "whitespace in reasoning stage must not transition: {out:?}"
        );
    }

    #[test]
    fn indexed_tool_fragments_assemble_into_calls() {
        let mut h = handler();
        let out = h.on_event(&delta_chunk(json!({
            "tool_calls": [{ "index": 0, "id": "call_a", "function": { "name": "Read", "arguments": "" } }]
        })));
        assert!(out
            .iter()
            .any(|i| matches!(i, ConversationItem::ToolCallStart(t) if t.name == "Read")));
        h.on_event(&delta_chunk(json!({
            "tool_calls": [{ "index": 0, "function": { "arguments": "{\"file_path\":\"x\"}" } }]
        })));
        let finished = h.finish();
        let call = finished
            .iter()
            .find_map(|i| match i {
                ConversationItem::ToolCall(t) => Some(t),
                _ => None,
            })
            .expect("tool call flushed at close");
        assert_eq!(call.call_id, "call_a");
        assert_eq!(call.arguments, r#"{"file_path":"x"}"#);
    }

    #[test]
    fn usage_chunk_populates_metadata() {
        let mut h = handler();
        h.on_event(&json!({
            "id": "chatcmpl-2",
            "choices": [],
            "model": "gpt-4o-2024-11-20",
            "usage": {
                "prompt_tokens": 120,
                "completion_tokens": 30,
                "total_tokens": 150,
                "prompt_tokens_details": { "cached_tokens": 100 },
                "completion_tokens_details": { "reasoning_tokens": 5 }
            }
        }));
        let meta = h.finish().pop().unwrap();
        match meta {
            ConversationItem::ResponseMetadata(m) => {
                assert_eq!(m.model_name, "gpt-4o-2024-11-20");
                let usage = m.usage.unwrap();
                assert_eq!(usage.input_tokens, 120);
                assert_eq!(usage.cached_tokens, 100);
                assert_eq!(usage.reasoning_tokens, 5);
                assert_eq!(usage.output_tokens, 30);
                assert_eq!(usage.context_window_size, Some(150));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn provider_field_is_recorded() {
        let mut h = handler();
        h.on_event(&json!({ "id": "gen-1", "provider": "Anthropic", "choices": [] }));
        let meta = h.finish().pop().unwrap();
        match meta {
            ConversationItem::ResponseMetadata(m) => {
                assert_eq!(m.provider.as_deref(), Some("Anthropic"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn openrouter_encrypted_detail_emits_item() {
        let mut h = handler();
        let out = h.on_event(&delta_chunk(json!({
            "reasoning_details": [{
                "type": "reasoning.encrypted",
                "format": "openai-responses-v1",
                "data": "SECRET",
                "index": 0
            }]
        })));
        assert!(out
            .iter()
            .any(|i| matches!(i, ConversationItem::ReasoningEncrypted(e) if e.encrypted_content == "SECRET")));
    }

    #[test]
    fn finish_emits_exactly_one_metadata() {
        let mut h = handler();
        h.on_event(&delta_chunk(json!({ "content": "done" })));
        let out = h.finish();
        let metadata_count = out
            .iter()
            .filter(|i| matches!(i, ConversationItem::ResponseMetadata(_)))
            .count();
        assert_eq!(metadata_count, 1);
        assert!(out
            .iter()
            .any(|i| matches!(i, ConversationItem::Assistant(a) if a.content == "done")));
    }
}
