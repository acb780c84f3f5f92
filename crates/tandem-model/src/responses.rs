// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI Responses streaming adapter.
//!
//! The richest protocol: typed events with explicit item lifecycles.
//! Reasoning replays across turns through `encrypted_content`, requested via
//! `include=["reasoning.encrypted_content"]`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use tandem_config::{ModelConfig, Protocol, ThinkingConfig};
use tandem_protocol::{
    AssistantMessageDelta, ConversationItem, ReasoningEncryptedItem, ReasoningTextItem, StartItem,
    StreamErrorItem, ToolCallItem, ToolCallStartItem, Usage,
};

use crate::client::{
    drive_sse, error_stream, http_client, LlmCallParameter, LlmClient, ResponseStream,
    SseEventHandler,
};
use crate::images;
use crate::input::{common, responses as input};
use crate::usage::MetadataTracker;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct ResponsesClient {
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

impl ResponsesClient {
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

/// Build the Responses API request body shared with the Copilot adapter.
pub(crate) fn build_request_body(
    input_items: &[ConversationItem],
    system: Option<&str>,
    tools: &[tandem_protocol::ToolSchema],
    model: &str,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    thinking: Option<&ThinkingConfig>,
    parallel_tool_calls: bool,
) -> Value {
    let mut body = json!({
        "model": model,
        "input": input::build_input(input_items, model),
        "stream": true,
        "store": false,
        "include": ["reasoning.encrypted_content"],
        "parallel_tool_calls": parallel_tool_calls,
    });
    if let Some(system) = system {
        if !system.is_empty() {
            body["instructions"] = json!(system);
        }
    }
    if !tools.is_empty() {
        body["tools"] = json!(input::build_tools(tools));
        body["tool_choice"] = json!("auto");
    }
    if let Some(max_tokens) = max_tokens {
        body["max_output_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(thinking) = thinking {
        if let Some(effort) = &thinking.reasoning_effort {
            body["reasoning"] = json!({
                "effort": effort,
                "summary": thinking.reasoning_summary.clone().unwrap_or_else(|| "auto".into()),
            });
        }
    }
    body
}

#[async_trait]
impl LlmClient for ResponsesClient {
    fn protocol(&self) -> Protocol {
        Protocol::Responses
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
        let body = build_request_body(
            &input_items,
            param.system.as_deref(),
            &param.tools,
            &self.model,
            param.max_tokens.or(self.max_tokens),
            param.temperature.or(self.temperature),
            param.thinking.as_ref().or(self.thinking.as_ref()),
            self.parallel_tool_calls,
        );

        debug!(model = %self.model, "sending responses request");
        let resp = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => return error_stream(&self.model, format!("Responses request failed: {e}")),
        };
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return error_stream(&self.model, format!("Responses error {status}: {text}"));
        }

        let handler =
            ResponsesEventHandler::new(&self.model, param.context_limit.or(self.context_limit));
        drive_sse(resp, handler)
    }
}

// ─── Event handler ────────────────────────────────────────────────────────────

pub(crate) struct ResponsesEventHandler {
    model: String,
    tracker: Option<MetadataTracker>,
    response_id: Option<String>,
}

impl ResponsesEventHandler {
    pub(crate) fn new(model: &str, context_limit: Option<u64>) -> Self {
        Self {
            model: model.to_string(),
            tracker: Some(MetadataTracker::new(model, context_limit)),
            response_id: None,
        }
    }

    fn record_token(&mut self) {
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.record_token();
        }
    }

    fn on_completed(&mut self, v: &Value) -> Vec<ConversationItem> {
        let mut out = Vec::new();
        let response = &v["response"];
        let status = response["status"].as_str().unwrap_or("completed").to_string();
        let error_reason = response["incomplete_details"]["reason"].as_str();

        if let Some(tracker) = self.tracker.as_mut() {
            if response.get("usage").is_some() {
                let usage_value = &response["usage"];
                tracker.set_usage(Usage {
                    input_tokens: usage_value["input_tokens"].as_u64().unwrap_or(0),
                    cached_tokens: usage_value["input_tokens_details"]["cached_tokens"]
                        .as_u64()
                        .unwrap_or(0),
                    reasoning_tokens: usage_value["output_tokens_details"]["reasoning_tokens"]
                        .as_u64()
                        .unwrap_or(0),
                    output_tokens: usage_value["output_tokens"].as_u64().unwrap_or(0),
                    // This protocol reports the window directly.
                    context_window_size: usage_value["total_tokens"].as_u64(),
                    ..Default::default()
                });
            }
            tracker.set_status(status.clone());
        }

        if status != "completed" {
            let mut message = format!("LLM response finished with status '{status}'");
            if let Some(reason) = error_reason {
                message = format!("{message}: {reason}");
            }
            out.push(ConversationItem::StreamError(StreamErrorItem::new(message)));
        }
        if let Some(mut tracker) = self.tracker.take() {
            tracker.set_response_id(self.response_id.clone());
            out.push(ConversationItem::ResponseMetadata(tracker.finalize()));
        }
        out
    }
}

impl SseEventHandler for ResponsesEventHandler {
    fn on_event(&mut self, v: &Value) -> Vec<ConversationItem> {
        let mut out = Vec::new();
        match v["type"].as_str().unwrap_or("") {
            "response.created" => {
                if let Some(id) = v["response"]["id"].as_str() {
                    self.response_id = Some(id.to_string());
                    out.push(ConversationItem::Start(StartItem::new(id)));
                }
            }
            "response.reasoning_summary_text.delta" => {
                self.record_token();
            }
            "response.reasoning_summary_text.done" => {
                if let Some(text) = v["text"].as_str().filter(|t| !t.is_empty()) {
                    out.push(ConversationItem::ReasoningText(ReasoningTextItem::new(
                        text,
                        self.model.clone(),
                        self.response_id.clone(),
                    )));
                }
            }
            "response.output_text.delta" | "response.text.delta" => {
                self.record_token();
                if let Some(delta) = v["delta"].as_str() {
                    out.push(ConversationItem::AssistantDelta(AssistantMessageDelta::new(
                        delta,
                        self.response_id.clone(),
                    )));
                }
            }
            "response.output_item.added" => {
                let item = &v["item"];
                if item["type"].as_str() == Some("function_call") {
                    out.push(ConversationItem::ToolCallStart(ToolCallStartItem::new(
                        item["call_id"].as_str().unwrap_or(""),
                        item["name"].as_str().unwrap_or(""),
                        self.response_id.clone(),
                    )));
                }
            }
            "response.output_item.done" => {
                let item = &v["item"];
                match item["type"].as_str().unwrap_or("") {
                    "reasoning" => {
                        if let Some(blob) = item["encrypted_content"].as_str() {
                            out.push(ConversationItem::ReasoningEncrypted(
                                ReasoningEncryptedItem::new(
                                    blob,
                                    Some(common::RESPONSES_ENCRYPTED_FORMAT.into()),
                                    self.model.clone(),
                                    self.response_id.clone(),
                                ),
                            ));
                        }
                    }
                    "message" => {
                        let text: Vec<&str> = item["content"]
                            .as_array()
                            .map(|parts| {
                                parts
                                    .iter()
                                    .filter(|p| p["type"].as_str() == Some("output_text"))
                                    .filter_map(|p| p["text"].as_str())
                                    .collect()
                            })
                            .unwrap_or_default();
                        out.push(ConversationItem::Assistant(
                            tandem_protocol::AssistantMessageItem::new(
                                text.join("\n"),
                                self.response_id.clone(),
                            ),
                        ));
                    }
                    "function_call" => {
                        self.record_token();
                        out.push(ConversationItem::ToolCall(ToolCallItem::new(
                            item["call_id"].as_str().unwrap_or(""),
                            item["name"].as_str().unwrap_or(""),
                            item["arguments"].as_str().unwrap_or("").trim(),
                            self.response_id.clone(),
                        )));
                    }
                    _ => {}
                }
            }
            "response.completed" | "response.incomplete" | "response.failed" => {
                out.extend(self.on_completed(v));
            }
            "error" => {
                let message = v["message"].as_str().unwrap_or("Responses stream error");
                out.push(ConversationItem::StreamError(StreamErrorItem::new(message)));
            }
            other => {
                debug!(event_type = other, "unhandled responses stream event");
            }
        }
        out
    }

    fn finish(&mut self) -> Vec<ConversationItem> {
        // Normally the terminal response.* event already finalized metadata.
        match self.tracker.take() {
            Some(mut tracker) => {
                tracker.set_response_id(self.response_id.clone());
                vec![ConversationItem::ResponseMetadata(tracker.finalize())]
            }
            None => Vec::new(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
