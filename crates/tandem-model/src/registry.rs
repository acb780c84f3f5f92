// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use tandem_config::{ModelConfig, Protocol};

use crate::anthropic::AnthropicClient;
use crate::client::LlmClient;
use crate::copilot::CopilotClient;
use crate::openai_compat::OpenAiCompatClient;
use crate::responses::ResponsesClient;

/// Instantiate the adapter for a model config's protocol.
pub fn create_client(config: &ModelConfig) -> anyhow::Result<Arc<dyn LlmClient>> {
    let client: Arc<dyn LlmClient> = match config.protocol {
        Protocol::Anthropic => Arc::new(AnthropicClient::from_config(config)),
        Protocol::OpenAi => Arc::new(OpenAiCompatClient::from_config(config)),
        Protocol::Responses => Arc::new(ResponsesClient::from_config(config)),
        Protocol::Copilot => Arc::new(CopilotClient::from_config(config)?),
    };
    Ok(client)
}
