// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Scripted in-memory client for driving the agent loop in tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use tandem_config::Protocol;
use tandem_protocol::{ConversationItem, ResponseMetadataItem, StartItem};

use crate::client::{LlmCallParameter, LlmClient, ResponseStream};

/// Yields one pre-scripted item sequence per `call`.
///
/// Scripts omit the `Start`/`ResponseMetadata` envelope; it is added
/// automatically so every scripted turn satisfies the stream contract.
/// Calls past the end of the script yield an empty turn.
pub struct MockClient {
    model: String,
    parallel_tool_calls: bool,
    scripts: Mutex<VecDeque<Vec<ConversationItem>>>,
    calls: Mutex<Vec<LlmCallParameter>>,
}

impl MockClient {
    pub fn new(model: impl Into<String>, scripts: Vec<Vec<ConversationItem>>) -> Self {
        Self {
            model: model.into(),
            parallel_tool_calls: true,
            scripts: Mutex::new(scripts.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_sequential_tools(mut self) -> Self {
        self.parallel_tool_calls = false;
        self
    }

    /// Parameters of every call made so far, for assertions.
    pub fn recorded_calls(&self) -> Vec<LlmCallParameter> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_made(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for MockClient {
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
        self.calls.lock().unwrap().push(param);
        let call_index = self.calls.lock().unwrap().len();
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();

        let response_id = format!("mock_{call_index}");
        let mut items = Vec::with_capacity(script.len() + 2);
        if !matches!(script.first(), Some(ConversationItem::Start(_))) {
            items.push(ConversationItem::Start(StartItem::new(&response_id)));
        }
        let has_metadata = script
            .iter()
            .any(|i| matches!(i, ConversationItem::ResponseMetadata(_)));
        items.extend(script);
        if !has_metadata {
            items.push(ConversationItem::ResponseMetadata(ResponseMetadataItem {
                response_id: Some(response_id),
                model_name: self.model.clone(),
                ..Default::default()
            }));
        }
        Box::pin(futures::stream::iter(items))
    }
}
